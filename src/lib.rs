//! # dismissible - Durable Per-User Dismissible Flags
//!
//! A dismissible flag records that a user acknowledged something, typically
//! a banner, notice or tour step. Flags persist in a key-value store, can
//! carry any JSON value, and can expire after a lifespan.
//!
//! ## Features
//!
//! - **Pluggable Store**: Any [`MetaStore`] with an atomic add-if-absent works
//! - **Optional Lifespan**: Flags can expire; expiry is checked on every read
//! - **Tenant Scoping**: Flags are global or private to one tenant
//! - **No Cache**: Every call hits the store, so a read never sees a stale flag
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            dismissible                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  FlagArgs   │───>│  FlagKeys   │───>│Dismissibles │                  │
//! │  │ (resolve +  │    │ (value key, │    │ get / set / │                  │
//! │  │  validate)  │    │ timeout key)│    │   delete    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │         Identity ─────────────────────────────┤                         │
//! │         Clock    ─────────────────────────────┤                         │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │          MetaStore (StorageEngine)           │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use dismissible::{Dismissibles, FlagArgs, StorageEngine};
//! use dismissible::identity::FixedUser;
//! use std::sync::Arc;
//!
//! let store = Arc::new(StorageEngine::new());
//! let flags = Dismissibles::new(Arc::clone(&store)).with_identity(FixedUser(42));
//!
//! // Dismiss the banner for a day
//! flags.set(FlagArgs::new("banner_v2").value("dismissed").lifespan(86_400)).unwrap();
//!
//! assert!(flags.get(FlagArgs::new("banner_v2")).unwrap().is_some());
//!
//! flags.delete(FlagArgs::new("banner_v2")).unwrap();
//! assert!(store.is_empty());
//! ```
//!
//! ## Module Overview
//!
//! - [`flag`]: Argument resolution, key derivation and the flag lifecycle
//! - [`storage`]: The store contract, an in-memory engine and JSON snapshots
//! - [`identity`]: Current-user resolution
//! - [`clock`]: Wall-clock time

pub mod clock;
pub mod flag;
pub mod identity;
pub mod storage;

// Re-export commonly used types for convenience
pub use flag::{Dismissibles, FlagArgs, FlagDefaults, FlagError, Scope, SetOutcome};
pub use storage::{MetaStore, StorageEngine, TenantId, UserId};

/// Snapshot file used by the CLI when `--store` is not given
pub const DEFAULT_STORE_PATH: &str = "dismissible.json";

/// Version of dismissible
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Dismissible Flags
//!
//! This module turns a caller's description of a flag into store
//! operations.
//!
//! ## Architecture
//!
//! ```text
//! FlagArgs
//!    │
//!    ▼
//! ┌─────────────────┐
//! │  resolve()      │  (args)   defaults + current user
//! │  validate()     │           id and user required
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  FlagKeys       │  (keys)   value key + timeout key
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Dismissibles   │  (lifecycle)  get / set / delete
//! └────────┬────────┘
//!          │
//!          ▼
//!      MetaStore
//! ```
//!
//! Invalid arguments are rejected before the store is touched.

pub mod args;
pub mod error;
pub mod keys;
pub mod lifecycle;

// Re-export commonly used types
pub use args::{FlagArgs, FlagConfig, FlagDefaults, Scope};
pub use error::FlagError;
pub use keys::{sanitize_key, timeout_key_name, FlagKeys, TIMEOUT_SUFFIX};
pub use lifecycle::{Dismissibles, SetOutcome};

//! Storage Module
//!
//! This module defines the store contract the flag lifecycle runs against,
//! plus a reference implementation of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Dismissibles                            │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ MetaStore
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...16    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ save / load
//!                            ▼
//!                     JSON snapshot file
//! ```
//!
//! ## The Contract
//!
//! Entries are keyed by `(user, key)`. The only concurrency guarantee the
//! lifecycle relies on is [`MetaStore::add_if_absent`]: it must insert
//! atomically and refuse when the key already exists.
//!
//! ## Example
//!
//! ```
//! use dismissible::storage::{MetaStore, StorageEngine};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//!
//! let id = engine.add_if_absent(7, "tour_done", Bytes::from("true"));
//! assert!(id.is_some());
//!
//! // A second insert of the same key is refused
//! assert!(engine.add_if_absent(7, "tour_done", Bytes::from("false")).is_none());
//! assert_eq!(engine.get(7, "tour_done"), Some(Bytes::from("true")));
//! ```

pub mod engine;
pub mod snapshot;

use bytes::Bytes;
use std::sync::Arc;

// Re-export commonly used types
pub use engine::{MetaEntry, StorageEngine, StorageStats, DEFAULT_TABLE_PREFIX};
pub use snapshot::SnapshotError;

/// Identifies the user an entry belongs to. Zero means "no user".
pub type UserId = u64;

/// Identifies a tenant for tenant-scoped flags.
pub type TenantId = u64;

/// Identifier the store assigns to a newly inserted entry.
pub type MetaId = u64;

/// A per-user key-value store.
///
/// Implementations must make [`add_if_absent`](MetaStore::add_if_absent)
/// atomic. Every other call may be a plain read or write.
pub trait MetaStore {
    /// Returns the value stored under `(user, key)`.
    fn get(&self, user: UserId, key: &str) -> Option<Bytes>;

    /// Inserts `value` only if `(user, key)` is not present.
    ///
    /// Returns the new entry's id, or `None` if the key already exists
    /// or the insert failed.
    fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId>;

    /// Overwrites an existing entry. Returns `false` if there was nothing to update.
    fn update(&self, user: UserId, key: &str, value: Bytes) -> bool;

    /// Removes an entry. Returns `false` if it did not exist.
    fn delete(&self, user: UserId, key: &str) -> bool;

    /// The key prefix that scopes entries to `tenant`.
    fn tenant_prefix(&self, tenant: TenantId) -> String;
}

impl<T: MetaStore + ?Sized> MetaStore for Arc<T> {
    fn get(&self, user: UserId, key: &str) -> Option<Bytes> {
        (**self).get(user, key)
    }

    fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId> {
        (**self).add_if_absent(user, key, value)
    }

    fn update(&self, user: UserId, key: &str, value: Bytes) -> bool {
        (**self).update(user, key, value)
    }

    fn delete(&self, user: UserId, key: &str) -> bool {
        (**self).delete(user, key)
    }

    fn tenant_prefix(&self, tenant: TenantId) -> String {
        (**self).tenant_prefix(tenant)
    }
}

impl<T: MetaStore + ?Sized> MetaStore for &T {
    fn get(&self, user: UserId, key: &str) -> Option<Bytes> {
        (**self).get(user, key)
    }

    fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId> {
        (**self).add_if_absent(user, key, value)
    }

    fn update(&self, user: UserId, key: &str, value: Bytes) -> bool {
        (**self).update(user, key, value)
    }

    fn delete(&self, user: UserId, key: &str) -> bool {
        (**self).delete(user, key)
    }

    fn tenant_prefix(&self, tenant: TenantId) -> String {
        (**self).tenant_prefix(tenant)
    }
}

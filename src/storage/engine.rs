//! Thread-Safe Per-User Meta Store
//!
//! This module implements the reference [`MetaStore`] for the crate.
//! It is a concurrent map from `(user, key)` to a byte value, with the
//! atomic add-if-absent primitive the flag lifecycle depends on.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, entries are spread across shards.
//! 2. **Atomic Add**: `add_if_absent` checks and inserts under a single write lock.
//! 3. **Meta Ids**: Every insert gets a fresh, monotonically increasing id, so a
//!    re-created entry is distinguishable from an updated one.
//! 4. **No Expiry**: The store knows nothing about lifespans. Expiry lives one
//!    layer up, in the flag lifecycle.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are distributed across shards by hashing `(user, key)`.

use crate::storage::{MetaId, MetaStore, TenantId, UserId};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 16;

/// Table prefix used when none is configured.
pub const DEFAULT_TABLE_PREFIX: &str = "app_";

/// A stored value together with the id it was inserted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    /// Id assigned when the entry was inserted
    pub id: MetaId,
    /// The stored value
    pub value: Bytes,
}

type ShardMap = HashMap<UserId, HashMap<String, MetaEntry>>;

/// A single shard containing a portion of the entries.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory, sharded implementation of [`MetaStore`].
///
/// This struct is designed to be wrapped in an `Arc` and shared. All
/// operations are thread-safe.
///
/// # Example
///
/// ```
/// use dismissible::storage::{MetaStore, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::with_table_prefix("wp_");
///
/// engine.add_if_absent(1, "welcome", Bytes::from("true"));
/// assert!(engine.update(1, "welcome", Bytes::from("false")));
/// assert_eq!(engine.get(1, "welcome"), Some(Bytes::from("false")));
///
/// assert_eq!(engine.tenant_prefix(3), "wp_3_");
/// ```
pub struct StorageEngine {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Base prefix tenant prefixes are built from
    table_prefix: String,

    /// Next id handed out by `add_if_absent`
    next_id: AtomicU64,

    /// Statistics: total number of entries
    key_count: AtomicU64,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total successful inserts
    add_count: AtomicU64,

    /// Statistics: inserts refused because the key existed
    add_rejected_count: AtomicU64,

    /// Statistics: total UPDATE operations
    update_count: AtomicU64,

    /// Statistics: total DELETE operations
    del_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("table_prefix", &self.table_prefix)
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine using [`DEFAULT_TABLE_PREFIX`].
    pub fn new() -> Self {
        Self::with_table_prefix(DEFAULT_TABLE_PREFIX)
    }

    /// Creates a new storage engine whose tenant prefixes start with `prefix`.
    pub fn with_table_prefix(prefix: impl Into<String>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            table_prefix: prefix.into(),
            next_id: AtomicU64::new(1),
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            add_count: AtomicU64::new(0),
            add_rejected_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    /// The base prefix tenant prefixes are built from.
    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    #[inline]
    fn shard_index(&self, user: UserId, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, user: UserId, key: &str) -> &Shard {
        &self.shards[self.shard_index(user, key)]
    }

    /// Returns the full entry, including its id, without touching statistics.
    pub fn entry(&self, user: UserId, key: &str) -> Option<MetaEntry> {
        self.get_shard(user, key)
            .read()
            .get(&user)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Checks whether an entry exists, without touching statistics.
    pub fn contains(&self, user: UserId, key: &str) -> bool {
        self.entry(user, key).is_some()
    }

    /// Returns the number of entries in the store.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries. Ids keep counting up.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            add_ops: self.add_count.load(Ordering::Relaxed),
            add_rejected: self.add_rejected_count.load(Ordering::Relaxed),
            update_ops: self.update_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
        }
    }

    /// Copies every entry out of the store, sorted by id.
    pub(crate) fn dump(&self) -> Vec<(UserId, String, MetaEntry)> {
        let mut rows = Vec::with_capacity(self.len() as usize);
        for shard in &self.shards {
            let data = shard.read();
            for (user, entries) in data.iter() {
                for (key, entry) in entries {
                    rows.push((*user, key.clone(), entry.clone()));
                }
            }
        }
        rows.sort_by_key(|(_, _, entry)| entry.id);
        rows
    }

    /// Inserts an entry with a known id, replacing any existing one.
    ///
    /// Used when loading a snapshot. Keeps `next_id` ahead of every restored id.
    pub(crate) fn restore(&self, user: UserId, key: String, entry: MetaEntry) {
        self.next_id
            .fetch_max(entry.id.saturating_add(1), Ordering::Relaxed);

        let shard = self.get_shard(user, &key);
        let mut data = shard.write();
        if data.entry(user).or_default().insert(key, entry).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MetaStore for StorageEngine {
    fn get(&self, user: UserId, key: &str) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        trace!(user, key, "get");

        self.get_shard(user, key)
            .read()
            .get(&user)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.value.clone())
    }

    fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId> {
        let shard = self.get_shard(user, key);
        let mut data = shard.write();
        let entries = data.entry(user).or_default();

        if entries.contains_key(key) {
            self.add_rejected_count.fetch_add(1, Ordering::Relaxed);
            trace!(user, key, "add refused, key exists");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(key.to_string(), MetaEntry { id, value });
        self.add_count.fetch_add(1, Ordering::Relaxed);
        self.key_count.fetch_add(1, Ordering::Relaxed);
        trace!(user, key, id, "added");

        Some(id)
    }

    fn update(&self, user: UserId, key: &str, value: Bytes) -> bool {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        trace!(user, key, "update");

        let shard = self.get_shard(user, key);
        let mut data = shard.write();
        match data.get_mut(&user).and_then(|entries| entries.get_mut(key)) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    fn delete(&self, user: UserId, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        trace!(user, key, "delete");

        let shard = self.get_shard(user, key);
        let mut data = shard.write();

        let Some(entries) = data.get_mut(&user) else {
            return false;
        };
        if entries.remove(key).is_none() {
            return false;
        }
        if entries.is_empty() {
            data.remove(&user);
        }
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        true
    }

    fn tenant_prefix(&self, tenant: TenantId) -> String {
        format!("{}{}_", self.table_prefix, tenant)
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of entries currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total successful inserts
    pub add_ops: u64,
    /// Inserts refused because the key already existed
    pub add_rejected: u64,
    /// Total UPDATE operations
    pub update_ops: u64,
    /// Total DELETE operations
    pub del_ops: u64,
}

impl StorageStats {
    /// Total number of calls made against the store.
    pub fn total_ops(&self) -> u64 {
        self.get_ops + self.add_ops + self.add_rejected + self.update_ops + self.del_ops
    }
}

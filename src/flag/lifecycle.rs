//! Flag Lifecycle
//!
//! [`Dismissibles`] implements get, set and delete for flags on top of a
//! [`MetaStore`]. It keeps no state of its own: every call re-reads the
//! store, and expiry is decided against the live timeout entry.
//!
//! ## States
//!
//! ```text
//! absent            ── set(life = 0) ──> present-no-ttl
//! absent            ── set(life > 0) ──> present-with-ttl
//! present-no-ttl    ── set(life = 0) ──> present-no-ttl      (update)
//! present-no-ttl    ── set(life > 0) ──> present-with-ttl    (delete + re-add)
//! present-with-ttl  ── set(any)      ──> present-with-ttl    (update)
//! present-with-ttl  ── clock passes  ──> expired
//! expired           ── get           ──> absent
//! any               ── delete        ──> absent
//! ```
//!
//! ## Expiry
//!
//! There is no sweeper. A flag whose timeout entry is at or before the
//! current time is deleted by the first `get` that sees it.
//!
//! ## Adding a Lifespan to an Existing Flag
//!
//! When a flag without a timeout entry is set again with a lifespan, both
//! entries are deleted and re-added with add-if-absent rather than being
//! updated in place. Add-if-absent is the only atomic primitive the store
//! offers, so this keeps concurrent setters from leaving duplicate or
//! mismatched timeout entries behind.
//!
//! Multi-entry sequences are not transactional. A crash or a conflicting
//! call between two steps can leave the value and timeout entries out of
//! step until the next `set` or `delete`, and nothing is rolled back.

use crate::clock::{Clock, SystemClock};
use crate::flag::{FlagArgs, FlagConfig, FlagDefaults, FlagError, FlagKeys};
use crate::identity::{Anonymous, Identity};
use crate::storage::{MetaId, MetaStore, UserId};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

/// What a successful [`Dismissibles::set`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The flag did not exist and was inserted
    Inserted(MetaId),
    /// The flag was deleted and re-inserted to attach a lifespan
    Recreated(MetaId),
    /// The existing flag was updated in place
    Updated,
}

impl SetOutcome {
    /// Id of the freshly inserted value entry, if one was inserted.
    pub fn meta_id(&self) -> Option<MetaId> {
        match self {
            SetOutcome::Inserted(id) | SetOutcome::Recreated(id) => Some(*id),
            SetOutcome::Updated => None,
        }
    }
}

/// Persistent dismissible flags backed by a [`MetaStore`].
///
/// # Example
///
/// ```
/// use dismissible::clock::ManualClock;
/// use dismissible::flag::{Dismissibles, FlagArgs};
/// use dismissible::identity::FixedUser;
/// use dismissible::storage::StorageEngine;
///
/// let clock = ManualClock::new(1_700_000_000);
/// let flags = Dismissibles::new(StorageEngine::new())
///     .with_identity(FixedUser(42))
///     .with_clock(clock.clone());
///
/// flags.set(FlagArgs::new("banner_v2").value("dismissed").lifespan(3600)).unwrap();
/// assert_eq!(
///     flags.get(FlagArgs::new("banner_v2")).unwrap(),
///     Some("dismissed".into())
/// );
///
/// clock.advance(3601);
/// assert_eq!(flags.get(FlagArgs::new("banner_v2")).unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Dismissibles<S, I = Anonymous, C = SystemClock> {
    store: S,
    identity: I,
    clock: C,
    defaults: FlagDefaults,
}

impl<S: MetaStore> Dismissibles<S> {
    /// Creates flags over `store` with no current user and the system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            identity: Anonymous,
            clock: SystemClock,
            defaults: FlagDefaults::default(),
        }
    }
}

impl<S, I, C> Dismissibles<S, I, C>
where
    S: MetaStore,
    I: Identity,
    C: Clock,
{
    /// Resolves unset users through `identity`.
    pub fn with_identity<J: Identity>(self, identity: J) -> Dismissibles<S, J, C> {
        Dismissibles {
            store: self.store,
            identity,
            clock: self.clock,
            defaults: self.defaults,
        }
    }

    /// Reads the current time from `clock`.
    pub fn with_clock<D: Clock>(self, clock: D) -> Dismissibles<S, I, D> {
        Dismissibles {
            store: self.store,
            identity: self.identity,
            clock,
            defaults: self.defaults,
        }
    }

    /// Replaces the values used for unset fields.
    pub fn with_defaults(mut self, defaults: FlagDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// The store flags are read from and written to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Values applied to fields a caller leaves unset.
    pub fn defaults(&self) -> &FlagDefaults {
        &self.defaults
    }

    /// Resolves and validates `args`, then derives the flag's keys.
    fn prepare(&self, args: FlagArgs) -> Result<(FlagConfig, FlagKeys), FlagError> {
        let config = args.resolve(&self.defaults, &self.identity);
        if let Err(err) = config.validate() {
            debug!(id = %config.id, user = config.user_id, error = %err, "Rejected flag arguments");
            return Err(err);
        }

        let keys = FlagKeys::derive(&self.store, &config.id, config.scope);
        Ok((config, keys))
    }

    /// Returns the flag's value, or `None` if it is unset or has expired.
    ///
    /// An expired flag is deleted from the store before returning.
    pub fn get(&self, args: FlagArgs) -> Result<Option<Value>, FlagError> {
        let (config, keys) = self.prepare(args)?;
        let user = config.user_id;

        let value = self.store.get(user, &keys.value);
        let timeout = self.store.get(user, &keys.timeout);

        if let Some(raw) = timeout {
            let expires_at = decode_timestamp(&keys.timeout, &raw)?;
            let now = self.clock.now();

            if expires_at <= now {
                self.store.delete(user, &keys.value);
                self.store.delete(user, &keys.timeout);
                debug!(id = %config.id, user, expires_at, now, "Flag expired");
                return Ok(None);
            }
        }

        value.map(|raw| decode_value(&keys.value, &raw)).transpose()
    }

    /// Stores the flag's value, creating it if needed.
    ///
    /// - A new flag is inserted, along with its timeout entry when it has a lifespan.
    /// - An existing flag is updated in place. A positive lifespan moves the
    ///   expiry to `now + lifespan`.
    /// - An existing flag without a timeout entry that is given a lifespan is
    ///   deleted and inserted again.
    ///
    /// Setting a lifespan of 0 on an existing flag leaves its timeout entry as is.
    pub fn set(&self, args: FlagArgs) -> Result<SetOutcome, FlagError> {
        let (config, keys) = self.prepare(args)?;
        let user = config.user_id;
        let expires_at = self.clock.now().saturating_add(config.lifespan);
        let value = encode_value(&config.value);

        if self.store.get(user, &keys.value).is_none() {
            if config.expires() {
                self.add_timeout(user, &keys.timeout, expires_at);
            }
            let id = self.insert_value(user, &keys.value, value)?;
            debug!(id = %config.id, user, meta_id = id, lifespan = config.lifespan, "Flag created");
            return Ok(SetOutcome::Inserted(id));
        }

        if config.expires() {
            if self.store.get(user, &keys.timeout).is_none() {
                self.store.delete(user, &keys.value);
                self.store.delete(user, &keys.timeout);
                self.add_timeout(user, &keys.timeout, expires_at);
                let id = self.insert_value(user, &keys.value, value)?;
                debug!(id = %config.id, user, meta_id = id, lifespan = config.lifespan, "Flag recreated with lifespan");
                return Ok(SetOutcome::Recreated(id));
            }

            if !self.store.update(user, &keys.timeout, encode_timestamp(expires_at)) {
                warn!(key = %keys.timeout, user, "Store refused to update timeout entry");
            }
        }

        if !self.store.update(user, &keys.value, value) {
            return Err(FlagError::UpdateRejected { key: keys.value });
        }

        debug!(id = %config.id, user, lifespan = config.lifespan, "Flag updated");
        Ok(SetOutcome::Updated)
    }

    /// Removes the flag. Succeeds whether or not it existed.
    pub fn delete(&self, args: FlagArgs) -> Result<(), FlagError> {
        let (config, keys) = self.prepare(args)?;
        let user = config.user_id;

        let removed_value = self.store.delete(user, &keys.value);
        let removed_timeout = self.store.delete(user, &keys.timeout);

        debug!(id = %config.id, user, removed_value, removed_timeout, "Flag deleted");
        Ok(())
    }

    fn add_timeout(&self, user: UserId, key: &str, expires_at: u64) {
        if self.store.add_if_absent(user, key, encode_timestamp(expires_at)).is_none() {
            warn!(key, user, "Store refused to insert timeout entry");
        }
    }

    fn insert_value(&self, user: UserId, key: &str, value: Bytes) -> Result<MetaId, FlagError> {
        self.store
            .add_if_absent(user, key, value)
            .ok_or_else(|| FlagError::InsertRejected {
                key: key.to_string(),
            })
    }
}

fn encode_value(value: &Value) -> Bytes {
    Bytes::from(value.to_string())
}

fn decode_value(key: &str, raw: &[u8]) -> Result<Value, FlagError> {
    serde_json::from_slice(raw).map_err(|e| {
        warn!(key, error = %e, "Malformed flag value");
        FlagError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
    })
}

fn encode_timestamp(secs: u64) -> Bytes {
    Bytes::from(secs.to_string())
}

fn decode_timestamp(key: &str, raw: &[u8]) -> Result<u64, FlagError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            warn!(key, "Malformed timeout entry");
            FlagError::Corrupt {
                key: key.to_string(),
                reason: "expiry is not a unix timestamp".to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::FixedUser;
    use crate::storage::{StorageEngine, TenantId};
    use serde_json::json;
    use std::sync::Arc;

    const T0: u64 = 1_700_000_000;

    type TestFlags = Dismissibles<Arc<StorageEngine>, FixedUser, ManualClock>;

    fn setup() -> (TestFlags, Arc<StorageEngine>, ManualClock) {
        let store = Arc::new(StorageEngine::new());
        let clock = ManualClock::new(T0);
        let flags = Dismissibles::new(Arc::clone(&store))
            .with_identity(FixedUser(42))
            .with_clock(clock.clone());
        (flags, store, clock)
    }

    fn timeout_of(store: &StorageEngine, user: UserId, key: &str) -> Option<u64> {
        store
            .entry(user, key)
            .map(|e| std::str::from_utf8(&e.value).unwrap().parse().unwrap())
    }

    #[test]
    fn test_invalid_args_never_touch_store() {
        let store = Arc::new(StorageEngine::new());
        let anonymous = Dismissibles::new(Arc::clone(&store));

        let missing_user = || FlagArgs::new("tour").tenant(3);
        assert_eq!(anonymous.get(missing_user()), Err(FlagError::MissingUser));
        assert_eq!(anonymous.set(missing_user()), Err(FlagError::MissingUser));
        assert_eq!(anonymous.delete(missing_user()), Err(FlagError::MissingUser));

        let empty_id = || FlagArgs::new("").user(42).lifespan(60);
        assert_eq!(anonymous.get(empty_id()), Err(FlagError::EmptyId));
        assert_eq!(anonymous.set(empty_id()), Err(FlagError::EmptyId));
        assert_eq!(anonymous.delete(empty_id()), Err(FlagError::EmptyId));

        assert_eq!(store.stats().total_ops(), 0);
    }

    #[test]
    fn test_get_never_set() {
        let (flags, _, _) = setup();
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), None);
    }

    #[test]
    fn test_default_value_and_current_user() {
        let (flags, store, _) = setup();

        let outcome = flags.set(FlagArgs::new("tour")).unwrap();
        assert!(matches!(outcome, SetOutcome::Inserted(_)));

        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!(true)));
        assert!(store.contains(42, "tour"));
    }

    #[test]
    fn test_no_lifespan_never_expires() {
        let (flags, store, clock) = setup();

        flags.set(FlagArgs::new("tour").value("seen")).unwrap();
        assert!(!store.contains(42, "tour_expires"));

        clock.advance(10 * 365 * 86_400);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!("seen")));
    }

    #[test]
    fn test_lifespan_expires_lazily() {
        let (flags, store, clock) = setup();

        flags.set(FlagArgs::new("tour").lifespan(60)).unwrap();
        assert_eq!(timeout_of(&store, 42, "tour_expires"), Some(T0 + 60));

        clock.set(T0 + 59);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!(true)));

        // Nothing is reclaimed until a read sees the flag
        clock.set(T0 + 60);
        assert_eq!(store.len(), 2);

        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), None);
        assert!(!store.contains(42, "tour"));
        assert!(!store.contains(42, "tour_expires"));
    }

    #[test]
    fn test_changing_lifespan_updates_in_place() {
        let (flags, store, clock) = setup();

        let first = flags.set(FlagArgs::new("tour").lifespan(60)).unwrap();
        let value_id = store.entry(42, "tour").unwrap().id;
        let timeout_id = store.entry(42, "tour_expires").unwrap().id;

        clock.advance(10);
        let second = flags.set(FlagArgs::new("tour").value(2).lifespan(600)).unwrap();

        assert!(matches!(first, SetOutcome::Inserted(_)));
        assert_eq!(second, SetOutcome::Updated);

        assert_eq!(store.len(), 2);
        assert_eq!(store.entry(42, "tour").unwrap().id, value_id);
        assert_eq!(store.entry(42, "tour_expires").unwrap().id, timeout_id);
        assert_eq!(timeout_of(&store, 42, "tour_expires"), Some(T0 + 10 + 600));

        clock.set(T0 + 100);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_adding_lifespan_recreates() {
        let (flags, store, clock) = setup();

        let first = flags.set(FlagArgs::new("tour").value("a")).unwrap();
        let updates_before = store.stats().update_ops;

        clock.advance(5);
        let second = flags.set(FlagArgs::new("tour").value("b").lifespan(30)).unwrap();

        // A fresh insert, not an in-place update
        assert!(matches!(second, SetOutcome::Recreated(_)));
        assert_ne!(second.meta_id(), first.meta_id());
        assert_eq!(store.entry(42, "tour").unwrap().id, second.meta_id().unwrap());
        assert_eq!(store.stats().update_ops, updates_before);

        assert_eq!(store.len(), 2);
        assert_eq!(timeout_of(&store, 42, "tour_expires"), Some(T0 + 5 + 30));
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!("b")));

        clock.advance(30);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), None);
    }

    #[test]
    fn test_dropping_lifespan_keeps_timeout() {
        let (flags, store, clock) = setup();

        flags.set(FlagArgs::new("tour").lifespan(60)).unwrap();
        let outcome = flags.set(FlagArgs::new("tour").value("again")).unwrap();

        assert_eq!(outcome, SetOutcome::Updated);
        assert_eq!(timeout_of(&store, 42, "tour_expires"), Some(T0 + 60));

        clock.advance(60);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let (flags, store, _) = setup();

        flags.set(FlagArgs::new("tour").lifespan(60)).unwrap();
        assert_eq!(flags.delete(FlagArgs::new("tour")), Ok(()));

        assert!(store.is_empty());
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), None);
    }

    #[test]
    fn test_delete_nonexistent() {
        let (flags, _, _) = setup();
        assert_eq!(flags.delete(FlagArgs::new("never-set")), Ok(()));
    }

    #[test]
    fn test_tenant_scope_is_separate() {
        let (flags, store, _) = setup();

        flags.set(FlagArgs::new("tour").value("global")).unwrap();
        flags.set(FlagArgs::new("tour").value("site 3").tenant(3).lifespan(60)).unwrap();

        assert!(store.contains(42, "app_3_tour"));
        assert!(store.contains(42, "app_3_tour_expires"));
        assert!(!store.contains(42, "tour_expires"));

        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!("global")));
        assert_eq!(
            flags.get(FlagArgs::new("tour").tenant(3)).unwrap(),
            Some(json!("site 3"))
        );

        flags.delete(FlagArgs::new("tour").tenant(3)).unwrap();
        assert_eq!(flags.get(FlagArgs::new("tour").tenant(3)).unwrap(), None);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!("global")));
    }

    #[test]
    fn test_users_are_separate() {
        let (flags, _, _) = setup();

        flags.set(FlagArgs::new("tour").user(1).value("one")).unwrap();
        assert_eq!(flags.get(FlagArgs::new("tour").user(2)).unwrap(), None);
        assert_eq!(flags.get(FlagArgs::new("tour").user(1)).unwrap(), Some(json!("one")));
    }

    #[test]
    fn test_structured_value() {
        let (flags, _, _) = setup();
        let value = json!({ "version": 3, "steps": ["intro", "done"] });

        flags.set(FlagArgs::new("tour").value(value.clone())).unwrap();
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(value));
    }

    #[test]
    fn test_custom_defaults() {
        let (flags, store, clock) = setup();
        let flags = flags.with_defaults(FlagDefaults {
            value: json!("dismissed"),
            lifespan: 86_400,
            scope: crate::flag::Scope::Tenant(7),
        });

        assert_eq!(flags.defaults().lifespan, 86_400);

        flags.set(FlagArgs::new("tour")).unwrap();
        assert!(store.contains(42, "app_7_tour_expires"));

        clock.advance(86_399);
        assert_eq!(flags.get(FlagArgs::new("tour")).unwrap(), Some(json!("dismissed")));
    }

    #[test]
    fn test_corrupt_timeout() {
        let (flags, store, _) = setup();

        store.add_if_absent(42, "tour", Bytes::from("true"));
        store.add_if_absent(42, "tour_expires", Bytes::from("soon"));

        let err = flags.get(FlagArgs::new("tour")).unwrap_err();
        assert!(matches!(err, FlagError::Corrupt { ref key, .. } if key == "tour_expires"));

        // The flag can still be cleared
        flags.delete(FlagArgs::new("tour")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_value() {
        let (flags, store, _) = setup();
        store.add_if_absent(42, "tour", Bytes::from("{not json"));

        let err = flags.get(FlagArgs::new("tour")).unwrap_err();
        assert!(matches!(err, FlagError::Corrupt { .. }));
        assert!(!err.is_invalid_args());
    }

    /// Refuses every insert except timeout entries.
    struct RefusingStore(StorageEngine);

    impl MetaStore for RefusingStore {
        fn get(&self, user: UserId, key: &str) -> Option<Bytes> {
            self.0.get(user, key)
        }

        fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId> {
            if key.ends_with(crate::flag::TIMEOUT_SUFFIX) {
                self.0.add_if_absent(user, key, value)
            } else {
                None
            }
        }

        fn update(&self, _user: UserId, _key: &str, _value: Bytes) -> bool {
            false
        }

        fn delete(&self, user: UserId, key: &str) -> bool {
            self.0.delete(user, key)
        }

        fn tenant_prefix(&self, tenant: TenantId) -> String {
            self.0.tenant_prefix(tenant)
        }
    }

    #[test]
    fn test_store_refusals_are_not_rolled_back() {
        let store = RefusingStore(StorageEngine::new());
        let flags = Dismissibles::new(&store)
            .with_identity(FixedUser(42))
            .with_clock(ManualClock::new(T0));

        let err = flags.set(FlagArgs::new("tour").lifespan(60)).unwrap_err();
        assert_eq!(err, FlagError::InsertRejected { key: "tour".to_string() });

        // The timeout entry written before the refusal stays behind
        assert!(store.0.contains(42, "tour_expires"));
        assert!(!store.0.contains(42, "tour"));
    }

    #[test]
    fn test_update_refused() {
        let store = RefusingStore(StorageEngine::new());
        store.0.add_if_absent(42, "tour", Bytes::from("true"));
        let flags = Dismissibles::new(&store).with_identity(FixedUser(42));

        let err = flags.set(FlagArgs::new("tour").value(false)).unwrap_err();
        assert_eq!(err, FlagError::UpdateRejected { key: "tour".to_string() });
    }

    /// Serves timeout entries as missing, like a lagging read replica.
    struct StaleTimeoutReads(StorageEngine);

    impl MetaStore for StaleTimeoutReads {
        fn get(&self, user: UserId, key: &str) -> Option<Bytes> {
            if key.ends_with(crate::flag::TIMEOUT_SUFFIX) {
                None
            } else {
                self.0.get(user, key)
            }
        }

        fn add_if_absent(&self, user: UserId, key: &str, value: Bytes) -> Option<MetaId> {
            self.0.add_if_absent(user, key, value)
        }

        fn update(&self, user: UserId, key: &str, value: Bytes) -> bool {
            self.0.update(user, key, value)
        }

        fn delete(&self, user: UserId, key: &str) -> bool {
            self.0.delete(user, key)
        }

        fn tenant_prefix(&self, tenant: TenantId) -> String {
            self.0.tenant_prefix(tenant)
        }
    }

    #[test]
    fn test_recreate_replaces_unseen_timeout() {
        let store = StaleTimeoutReads(StorageEngine::new());
        store.0.add_if_absent(42, "tour", Bytes::from("true"));
        store.0.add_if_absent(42, "tour_expires", Bytes::from((T0 + 10).to_string()));

        let flags = Dismissibles::new(&store)
            .with_identity(FixedUser(42))
            .with_clock(ManualClock::new(T0));

        let outcome = flags.set(FlagArgs::new("tour").lifespan(300)).unwrap();

        assert!(matches!(outcome, SetOutcome::Recreated(_)));
        assert_eq!(store.0.len(), 2);
        assert_eq!(timeout_of(&store.0, 42, "tour_expires"), Some(T0 + 300));
    }

    #[test]
    fn test_banner_scenario() {
        let (flags, store, clock) = setup();
        let banner = || FlagArgs::new("banner_v2").user(42);

        let outcome = flags.set(banner().value("dismissed").lifespan(3600)).unwrap();
        assert!(outcome.meta_id().is_some());

        clock.set(T0 + 1800);
        assert_eq!(flags.get(banner()).unwrap(), Some(json!("dismissed")));

        clock.set(T0 + 3601);
        assert_eq!(flags.get(banner()).unwrap(), None);
        assert!(!store.contains(42, "banner_v2"));
        assert!(!store.contains(42, "banner_v2_expires"));
    }
}

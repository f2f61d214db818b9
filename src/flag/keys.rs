//! Storage Key Derivation
//!
//! Each flag occupies two entries for its user:
//!
//! ```text
//! value entry    {prefix}{id}
//! timeout entry  {prefix}{sanitize(id)}_expires
//! ```
//!
//! The prefix is empty for global flags and comes from the store for
//! tenant-scoped ones.

use crate::flag::Scope;
use crate::storage::MetaStore;

/// Appended to the sanitized id to name the timeout entry.
pub const TIMEOUT_SUFFIX: &str = "_expires";

/// Lowercases `id` and keeps only `[a-z0-9_-]`.
pub fn sanitize_key(id: &str) -> String {
    id.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// Name of the timeout entry, before prefixing.
pub fn timeout_key_name(id: &str) -> String {
    let mut name = sanitize_key(id);
    name.push_str(TIMEOUT_SUFFIX);
    name
}

/// Key prefix for `scope`.
pub fn prefix(store: &impl MetaStore, scope: Scope) -> String {
    match scope {
        Scope::Global => String::new(),
        Scope::Tenant(tenant) => store.tenant_prefix(tenant),
    }
}

/// The two store keys belonging to one flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagKeys {
    pub value: String,
    pub timeout: String,
}

impl FlagKeys {
    pub fn derive(store: &impl MetaStore, id: &str, scope: Scope) -> Self {
        let prefix = prefix(store, scope);
        Self {
            value: format!("{}{}", prefix, id),
            timeout: format!("{}{}", prefix, timeout_key_name(id)),
        }
    }
}

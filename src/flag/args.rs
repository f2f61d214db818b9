//! Argument Resolution
//!
//! Callers describe a flag with a partially filled [`FlagArgs`]. Before any
//! store access it is resolved against [`FlagDefaults`] and the current
//! [`Identity`] into a complete [`FlagConfig`], then validated.

use crate::flag::FlagError;
use crate::identity::Identity;
use crate::storage::{TenantId, UserId};
use serde_json::Value;

/// Whether a flag is shared across the installation or private to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Shared across every tenant
    #[default]
    Global,
    /// Private to one tenant
    Tenant(TenantId),
}

/// Values used for every field a caller leaves unset.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDefaults {
    /// Stored value (default: `true`)
    pub value: Value,

    /// Lifespan in seconds, 0 = never expires (default: 0)
    pub lifespan: u64,

    /// Scope (default: global)
    pub scope: Scope,
}

impl Default for FlagDefaults {
    fn default() -> Self {
        Self {
            value: Value::Bool(true),
            lifespan: 0,
            scope: Scope::Global,
        }
    }
}

/// Caller-supplied description of a flag.
///
/// ```
/// use dismissible::flag::{FlagArgs, Scope};
///
/// let args = FlagArgs::new("banner_v2")
///     .user(42)
///     .value("dismissed")
///     .lifespan(3600)
///     .tenant(3);
///
/// assert_eq!(args.scope, Some(Scope::Tenant(3)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagArgs {
    pub id: String,
    pub user_id: Option<UserId>,
    pub value: Option<Value>,
    pub lifespan: Option<u64>,
    pub scope: Option<Scope>,
}

impl FlagArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Seconds until the flag expires. 0 means never.
    pub fn lifespan(mut self, secs: u64) -> Self {
        self.lifespan = Some(secs);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Shorthand for `scope(Scope::Tenant(tenant))`.
    pub fn tenant(self, tenant: TenantId) -> Self {
        self.scope(Scope::Tenant(tenant))
    }

    /// Fills every unset field. A missing user with no current user resolves to 0.
    pub fn resolve(self, defaults: &FlagDefaults, identity: &impl Identity) -> FlagConfig {
        let user_id = match self.user_id {
            Some(user_id) => user_id,
            None => identity.current_user().unwrap_or(0),
        };

        FlagConfig {
            id: self.id,
            user_id,
            value: self.value.unwrap_or_else(|| defaults.value.clone()),
            lifespan: self.lifespan.unwrap_or(defaults.lifespan),
            scope: self.scope.unwrap_or(defaults.scope),
        }
    }
}

/// A fully resolved flag description.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagConfig {
    pub id: String,
    pub user_id: UserId,
    pub value: Value,
    pub lifespan: u64,
    pub scope: Scope,
}

impl FlagConfig {
    /// Checks that the flag has an id and belongs to a user.
    pub fn validate(&self) -> Result<(), FlagError> {
        if self.id.is_empty() {
            return Err(FlagError::EmptyId);
        }
        if self.user_id == 0 {
            return Err(FlagError::MissingUser);
        }
        Ok(())
    }

    pub fn expires(&self) -> bool {
        self.lifespan > 0
    }
}

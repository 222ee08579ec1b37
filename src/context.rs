//! Request Context
//!
//! TigerStyle: The caller's identity, consumed as an opaque capability.
//!
//! A context carries the tenant that owns what it creates and whether it
//! may see everything. Contexts are hashable so the client cache can key
//! on them.

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};

/// Identity of a caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// Owning tenant for resources created with this context
    pub tenant: String,
    /// Admin contexts see every tenant's resources
    pub is_admin: bool,
    /// Optional user name, only used in logs
    pub user: Option<String>,
}

impl Context {
    /// Create a non-admin context for a tenant
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            is_admin: false,
            user: None,
        }
    }

    /// Create an admin context for a tenant
    pub fn admin(tenant: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::new(tenant)
        }
    }

    /// Set the user name
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Can this context see a resource owned by `owner`?
    pub fn can_see(&self, owner: &Context) -> bool {
        self.is_admin || owner.tenant == self.tenant
    }
}

/// Admin-only authorization check.
pub fn authorize(context: &Context) -> Result<()> {
    if context.is_admin {
        Ok(())
    } else {
        Err(CloudError::PermissionDenied(format!(
            "tenant {} is not an admin",
            context.tenant
        )))
    }
}

//! Account View
//!
//! TigerStyle: Privileged, read-only projection of one tenant's servers.

use serde::Serialize;

use crate::backend::Backend;
use crate::context::{authorize, Context};
use crate::error::Result;
use crate::servers::{ServerId, ServerStatus};

/// A server as listed on an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountServer {
    pub id: ServerId,
    pub name: String,
    pub status: ServerStatus,
    pub host: String,
}

/// One tenant's servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: String,
    pub servers: Vec<AccountServer>,
}

/// Admin-only account view
#[derive(Debug, Clone, Copy)]
pub struct Accounts<'a> {
    backend: &'a Backend,
    context: &'a Context,
}

impl<'a> Accounts<'a> {
    pub fn new(backend: &'a Backend, context: &'a Context) -> Self {
        Self { backend, context }
    }

    /// Every server owned by `tenant_id`, whatever the caller's own tenant.
    pub async fn get_instances(&self, tenant_id: &str) -> Result<Account> {
        authorize(self.context)?;

        let db = self.backend.servers_db().read().await;
        let mut owned: Vec<_> = db
            .values()
            .filter(|server| server.tenant() == tenant_id)
            .collect();
        owned.sort_by_key(|server| server.local_id);

        Ok(Account {
            id: tenant_id.to_string(),
            servers: owned
                .into_iter()
                .map(|server| AccountServer {
                    id: server.id.clone(),
                    name: server.name.clone(),
                    status: server.status,
                    host: server.host.clone(),
                })
                .collect(),
        })
    }
}

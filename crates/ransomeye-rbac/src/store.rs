//! Role assignment storage

use async_trait::async_trait;
use ransomeye_types::{Role, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::Result;

/// Looks up the role assigned to a user. One role per user; a user with no
/// row has no access at all.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn role_for_user(&self, user_id: &UserId) -> Result<Option<Role>>;
}

/// In-memory role store
#[derive(Default)]
pub struct MemoryRoleStore {
    roles: RwLock<HashMap<UserId, Role>>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, user_id: UserId, role: Role) {
        self.roles.write().await.insert(user_id, role);
    }

    pub async fn revoke(&self, user_id: &UserId) {
        self.roles.write().await.remove(user_id);
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn role_for_user(&self, user_id: &UserId) -> Result<Option<Role>> {
        Ok(self.roles.read().await.get(user_id).copied())
    }
}

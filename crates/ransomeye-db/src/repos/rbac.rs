//! Role-assignment persistence

use async_trait::async_trait;
use ransomeye_rbac::{RbacError, RoleStore};
use ransomeye_types::{Role, UserId};
use sqlx::{PgPool, Row};

use crate::repos::enum_from_text;

/// PostgreSQL-backed role store
pub struct PgRoleStore {
    pool: PgPool,
}

impl PgRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Assign or replace a user's single role
    pub async fn assign(&self, user_id: &UserId, role: Role) -> ransomeye_rbac::Result<()> {
        sqlx::query(
            "INSERT INTO rbac_user_roles (user_id, role) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(user_id.as_uuid())
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RbacError::Store(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    async fn role_for_user(&self, user_id: &UserId) -> ransomeye_rbac::Result<Option<Role>> {
        let row = sqlx::query("SELECT role FROM rbac_user_roles WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RbacError::Store(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let role: String = row
                    .try_get("role")
                    .map_err(|e| RbacError::Store(e.to_string()))?;
                Ok(Some(
                    enum_from_text(&role).map_err(|e| RbacError::Store(e.to_string()))?,
                ))
            }
        }
    }
}

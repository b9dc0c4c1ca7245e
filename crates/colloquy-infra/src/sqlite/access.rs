//! SQLite access control.
//!
//! Tier lookup only. Config-listed super admins win over the `users` table;
//! identities with no row and no config entry get no tier at all, which the
//! service surfaces as `Unauthorized`.

use sqlx::Row;

use colloquy_core::chat::repository::AccessControl;
use colloquy_types::conversation::{PermissionTier, UserId};
use colloquy_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `AccessControl`.
pub struct SqliteAccessControl {
    pool: DatabasePool,
    super_admins: Vec<i64>,
}

impl SqliteAccessControl {
    pub fn new(pool: DatabasePool, super_admins: Vec<i64>) -> Self {
        Self { pool, super_admins }
    }
}

impl AccessControl for SqliteAccessControl {
    async fn permission_tier(
        &self,
        user: UserId,
    ) -> Result<Option<PermissionTier>, RepositoryError> {
        if self.super_admins.contains(&user.0) {
            return Ok(Some(PermissionTier::SuperAdmin));
        }

        let row = sqlx::query("SELECT role FROM users WHERE user_id = ?")
            .bind(user.0)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let role: String = row
                    .try_get("role")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let tier = role
                    .parse::<PermissionTier>()
                    .map_err(RepositoryError::Query)?;
                Ok(Some(tier))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn insert_user(pool: &DatabasePool, user_id: i64, role: &str) {
        sqlx::query("INSERT INTO users (user_id, role, display_name, first_seen) VALUES (?, ?, ?, ?)")
            .bind(user_id)
            .bind(role)
            .bind("Test User")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool.writer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_identity_has_no_tier() {
        let access = SqliteAccessControl::new(test_pool().await, Vec::new());
        assert!(access.permission_tier(UserId(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_table_roles_map_to_tiers() {
        let pool = test_pool().await;
        insert_user(&pool, 1, "user").await;
        insert_user(&pool, 2, "admin").await;
        insert_user(&pool, 3, "super_admin").await;

        let access = SqliteAccessControl::new(pool, Vec::new());
        assert_eq!(
            access.permission_tier(UserId(1)).await.unwrap(),
            Some(PermissionTier::User)
        );
        assert_eq!(
            access.permission_tier(UserId(2)).await.unwrap(),
            Some(PermissionTier::Admin)
        );
        assert_eq!(
            access.permission_tier(UserId(3)).await.unwrap(),
            Some(PermissionTier::SuperAdmin)
        );
    }

    #[tokio::test]
    async fn test_config_super_admins_override_table() {
        let pool = test_pool().await;
        insert_user(&pool, 5, "user").await;

        let access = SqliteAccessControl::new(pool, vec![5, 6]);
        assert_eq!(
            access.permission_tier(UserId(5)).await.unwrap(),
            Some(PermissionTier::SuperAdmin)
        );
        // Config entry suffices even without a users row.
        assert_eq!(
            access.permission_tier(UserId(6)).await.unwrap(),
            Some(PermissionTier::SuperAdmin)
        );
    }
}

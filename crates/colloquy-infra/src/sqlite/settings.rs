//! SQLite settings repository.
//!
//! Per-conversation overrides live in one `conversation_settings` row per
//! key. Each setter upserts its own column so a provider switch never
//! clobbers a concurrent prompt change. Clearing a setting stores NULL
//! rather than deleting the row.

use chrono::Utc;
use sqlx::Row;

use colloquy_core::chat::repository::SettingsRepository;
use colloquy_types::conversation::ConversationKey;
use colloquy_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SettingsRepository`.
pub struct SqliteSettingsRepository {
    pool: DatabasePool,
}

impl SqliteSettingsRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn read_column<T>(
        &self,
        key: ConversationKey,
        column: &str,
    ) -> Result<Option<T>, RepositoryError>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + Unpin,
    {
        let sql = format!("SELECT {column} FROM conversation_settings WHERE conversation_key = ?");
        let row = sqlx::query(&sql)
            .bind(key.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => row
                .try_get::<Option<T>, _>(0)
                .map_err(|e| RepositoryError::Query(e.to_string())),
            None => Ok(None),
        }
    }
}

impl SettingsRepository for SqliteSettingsRepository {
    async fn system_prompt(
        &self,
        key: ConversationKey,
    ) -> Result<Option<String>, RepositoryError> {
        self.read_column(key, "system_prompt").await
    }

    async fn set_system_prompt(
        &self,
        key: ConversationKey,
        prompt: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversation_settings (conversation_key, system_prompt, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(conversation_key) DO UPDATE SET
                   system_prompt = excluded.system_prompt,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key.to_string())
        .bind(prompt)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn provider_preference(
        &self,
        key: ConversationKey,
    ) -> Result<Option<String>, RepositoryError> {
        self.read_column(key, "provider").await
    }

    async fn set_provider_preference(
        &self,
        key: ConversationKey,
        provider: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversation_settings (conversation_key, provider, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(conversation_key) DO UPDATE SET
                   provider = excluded.provider,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key.to_string())
        .bind(provider)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn temperature(&self, key: ConversationKey) -> Result<Option<f64>, RepositoryError> {
        self.read_column(key, "temperature").await
    }

    async fn set_temperature(
        &self,
        key: ConversationKey,
        temperature: Option<f64>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversation_settings (conversation_key, temperature, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(conversation_key) DO UPDATE SET
                   temperature = excluded.temperature,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key.to_string())
        .bind(temperature)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::conversation::UserId;

    async fn test_repo() -> SqliteSettingsRepository {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteSettingsRepository::new(DatabasePool::new(&url).await.unwrap())
    }

    #[tokio::test]
    async fn test_unset_settings_read_as_none() {
        let repo = test_repo().await;
        let key = ConversationKey::private(UserId(1));
        assert!(repo.system_prompt(key).await.unwrap().is_none());
        assert!(repo.provider_preference(key).await.unwrap().is_none());
        assert!(repo.temperature(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_and_clear_system_prompt() {
        let repo = test_repo().await;
        let key = ConversationKey::private(UserId(1));

        repo.set_system_prompt(key, Some("Be terse.")).await.unwrap();
        assert_eq!(
            repo.system_prompt(key).await.unwrap().as_deref(),
            Some("Be terse.")
        );

        repo.set_system_prompt(key, None).await.unwrap();
        assert!(repo.system_prompt(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_setters_do_not_clobber_other_columns() {
        let repo = test_repo().await;
        let key = ConversationKey::group(-5);

        repo.set_provider_preference(key, Some("grok")).await.unwrap();
        repo.set_temperature(key, Some(0.3)).await.unwrap();
        repo.set_system_prompt(key, Some("Short replies.")).await.unwrap();

        assert_eq!(
            repo.provider_preference(key).await.unwrap().as_deref(),
            Some("grok")
        );
        assert_eq!(repo.temperature(key).await.unwrap(), Some(0.3));
        assert_eq!(
            repo.system_prompt(key).await.unwrap().as_deref(),
            Some("Short replies.")
        );
    }

    #[tokio::test]
    async fn test_settings_are_keyed_per_conversation() {
        let repo = test_repo().await;
        let a = ConversationKey::private(UserId(1));
        let b = ConversationKey::private(UserId(2));

        repo.set_temperature(a, Some(1.5)).await.unwrap();
        assert_eq!(repo.temperature(a).await.unwrap(), Some(1.5));
        assert!(repo.temperature(b).await.unwrap().is_none());
    }
}

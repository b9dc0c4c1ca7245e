//! SQLite conversation repository.
//!
//! Persists a conversation as one `conversations` row plus its ordered
//! `turns` rows. Saves are last-writer-wins over the whole history: the
//! cache is the authority on live state, and each flush rewrites the turn
//! set in a single transaction. Overrides live in `conversation_settings`
//! and are joined in at load time.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use colloquy_core::chat::repository::ConversationRepository;
use colloquy_types::conversation::{Conversation, ConversationKey, MessageRole, Turn};
use colloquy_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct TurnRow {
    id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TurnRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_turn(self) -> Result<Turn, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid turn id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(Turn {
            id,
            role,
            content: self.content,
            created_at,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

impl ConversationRepository for SqliteConversationRepository {
    async fn load(&self, key: ConversationKey) -> Result<Option<Conversation>, RepositoryError> {
        let key_str = key.to_string();

        let Some(row) = sqlx::query(
            "SELECT summary, created_at, updated_at FROM conversations WHERE key = ?",
        )
        .bind(&key_str)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        else {
            return Ok(None);
        };

        let summary: Option<String> = row
            .try_get("summary")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let turn_rows = sqlx::query(
            "SELECT id, role, content, created_at FROM turns WHERE conversation_key = ? ORDER BY seq ASC",
        )
        .bind(&key_str)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut turns = Vec::with_capacity(turn_rows.len());
        for row in &turn_rows {
            let turn_row =
                TurnRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            turns.push(turn_row.into_turn()?);
        }

        let settings = sqlx::query(
            "SELECT system_prompt, provider, temperature FROM conversation_settings WHERE conversation_key = ?",
        )
        .bind(&key_str)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut conversation = Conversation {
            key,
            turns,
            summary,
            provider_override: None,
            temperature_override: None,
            system_prompt_override: None,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        };

        if let Some(row) = settings {
            conversation.system_prompt_override = row
                .try_get("system_prompt")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            conversation.provider_override = row
                .try_get("provider")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            conversation.temperature_override = row
                .try_get("temperature")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        Ok(Some(conversation))
    }

    async fn save(
        &self,
        key: ConversationKey,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let key_str = key.to_string();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO conversations (key, summary, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                   summary = excluded.summary,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&key_str)
        .bind(&conversation.summary)
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM turns WHERE conversation_key = ?")
            .bind(&key_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for (seq, turn) in conversation.turns.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO turns (id, conversation_key, seq, role, content, created_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(turn.id.to_string())
            .bind(&key_str)
            .bind(seq as i64)
            .bind(turn.role.to_string())
            .bind(&turn.content)
            .bind(format_datetime(&turn.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::conversation::UserId;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let loaded = repo
            .load(ConversationKey::private(UserId(1)))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let key = ConversationKey::private(UserId(42));

        let mut conversation = Conversation::new(key);
        conversation.push_turn(Turn::user("hello"));
        conversation.push_turn(Turn::assistant("hi there"));
        conversation.summary = Some("greeting exchange".to_string());

        repo.save(key, &conversation).await.unwrap();

        let loaded = repo.load(key).await.unwrap().unwrap();
        assert_eq!(loaded.key, key);
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].content, "hello");
        assert_eq!(loaded.turns[0].role, MessageRole::User);
        assert_eq!(loaded.turns[1].role, MessageRole::Assistant);
        assert_eq!(loaded.summary.as_deref(), Some("greeting exchange"));
        assert_eq!(loaded.turns[0].id, conversation.turns[0].id);
    }

    #[tokio::test]
    async fn test_save_rewrites_turn_set() {
        let repo = SqliteConversationRepository::new(test_pool().await);
        let key = ConversationKey::group(-100);

        let mut conversation = Conversation::new(key);
        for i in 0..5 {
            conversation.push_turn(Turn::user(format!("msg {i}")));
        }
        repo.save(key, &conversation).await.unwrap();

        // Compact down to the last two turns and save again.
        conversation.turns.drain(..3);
        conversation.summary = Some("earlier messages".to_string());
        repo.save(key, &conversation).await.unwrap();

        let loaded = repo.load(key).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].content, "msg 3");
        assert_eq!(loaded.turns[1].content, "msg 4");
    }

    #[tokio::test]
    async fn test_load_joins_settings_overrides() {
        let pool = test_pool().await;
        let repo = SqliteConversationRepository::new(pool.clone());
        let key = ConversationKey::private(UserId(7));

        let conversation = Conversation::new(key);
        repo.save(key, &conversation).await.unwrap();

        sqlx::query(
            r#"INSERT INTO conversation_settings (conversation_key, system_prompt, provider, temperature, updated_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(key.to_string())
        .bind("Be brief.")
        .bind("grok")
        .bind(0.5_f64)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool.writer)
        .await
        .unwrap();

        let loaded = repo.load(key).await.unwrap().unwrap();
        assert_eq!(loaded.system_prompt_override.as_deref(), Some("Be brief."));
        assert_eq!(loaded.provider_override.as_deref(), Some("grok"));
        assert_eq!(loaded.temperature_override, Some(0.5));
    }

    #[tokio::test]
    async fn test_save_preserves_settings_row() {
        let pool = test_pool().await;
        let repo = SqliteConversationRepository::new(pool.clone());
        let key = ConversationKey::private(UserId(9));

        sqlx::query(
            r#"INSERT INTO conversation_settings (conversation_key, provider, updated_at)
               VALUES (?, ?, ?)"#,
        )
        .bind(key.to_string())
        .bind("deepseek")
        .bind(Utc::now().to_rfc3339())
        .execute(&pool.writer)
        .await
        .unwrap();

        let mut conversation = Conversation::new(key);
        conversation.push_turn(Turn::user("hi"));
        repo.save(key, &conversation).await.unwrap();

        let loaded = repo.load(key).await.unwrap().unwrap();
        assert_eq!(loaded.provider_override.as_deref(), Some("deepseek"));
    }
}

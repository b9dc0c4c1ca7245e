//! SQLite event sink for the durable audit log.
//!
//! Each appended event becomes one `event_log` row: queryable columns for
//! kind, conversation, and identity, plus the full event as JSON in
//! `detail`. The write log worker is the only writer; `recent` serves the
//! read side of the events endpoint.

use chrono::{DateTime, Utc};
use sqlx::Row;

use colloquy_core::audit::writelog::EventSink;
use colloquy_types::error::RepositoryError;
use colloquy_types::event::AuditEvent;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `EventSink`.
#[derive(Clone)]
pub struct SqliteEventSink {
    pool: DatabasePool,
}

/// One persisted audit event, as read back from the log.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: i64,
    pub kind: String,
    pub conversation_key: String,
    pub user_id: Option<i64>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SqliteEventSink {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recent events, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, conversation_key, user_id, detail, created_at
             FROM event_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let detail_raw: String = row
                .try_get("detail")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let detail = serde_json::from_str(&detail_raw)
                .map_err(|e| RepositoryError::Query(format!("invalid event detail: {e}")))?;
            let created_at_raw: String = row
                .try_get("created_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))?;

            events.push(StoredEvent {
                id: row
                    .try_get("id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                kind: row
                    .try_get("kind")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                conversation_key: row
                    .try_get("conversation_key")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                user_id: row
                    .try_get("user_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?,
                detail,
                created_at,
            });
        }

        Ok(events)
    }
}

impl EventSink for SqliteEventSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let detail = serde_json::to_string(event)
            .map_err(|e| RepositoryError::Query(format!("event serialization: {e}")))?;

        sqlx::query(
            r#"INSERT INTO event_log (kind, conversation_key, user_id, detail, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(event.kind())
        .bind(event.conversation_key().to_string())
        .bind(event.user_id().map(|u| u.0))
        .bind(detail)
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
    use colloquy_types::conversation::{ConversationKey, UserId};
    use colloquy_types::llm::MessageRole;

    async fn test_sink() -> SqliteEventSink {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteEventSink::new(DatabasePool::new(&url).await.unwrap())
    }

    fn turn_event(text: &str) -> AuditEvent {
        AuditEvent::TurnRecorded {
            conversation_key: ConversationKey::private(UserId(42)),
            user_id: UserId(42),
            role: MessageRole::User,
            provider: None,
            content: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let sink = test_sink().await;
        sink.append(&turn_event("hello")).await.unwrap();

        let events = sink.recent(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "turn_recorded");
        assert_eq!(events[0].conversation_key, "private:42");
        assert_eq!(events[0].user_id, Some(42));
        assert_eq!(events[0].detail["content"], "hello");
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let sink = test_sink().await;
        for i in 0..5 {
            sink.append(&turn_event(&format!("msg {i}"))).await.unwrap();
        }

        let events = sink.recent(3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].detail["content"], "msg 4");
        assert_eq!(events[2].detail["content"], "msg 2");
    }

    #[tokio::test]
    async fn test_summary_event_has_no_user() {
        let sink = test_sink().await;
        sink.append(&AuditEvent::SummaryCompacted {
            conversation_key: ConversationKey::group(-12),
            turns_compacted: 20,
            summary_chars: 400,
        })
        .await
        .unwrap();

        let events = sink.recent(1).await.unwrap();
        assert_eq!(events[0].kind, "summary_compacted");
        assert!(events[0].user_id.is_none());
        assert_eq!(events[0].conversation_key, "group:-12");
    }
}

//! Append-only chat log backed by SQLite.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use crate::models::ChatMessage;

/// Limit applied when a caller asks for a non-positive number of messages.
pub const DEFAULT_RECENT_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct MessageStore {
    pub(crate) pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a message, stamping it with the current UTC time.
    pub async fn append(&self, author: &str, channel: &str, text: &str) -> Result<ChatMessage> {
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO messages (author, channel, text, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(author)
        .bind(channel)
        .bind(text)
        .bind(created_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            author: author.to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
            created_at,
        })
    }

    /// The newest `limit` messages of a channel, returned oldest-first.
    pub async fn recent(&self, channel: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let limit = if limit <= 0 { DEFAULT_RECENT_LIMIT } else { limit };

        let rows = sqlx::query(
            r#"
            SELECT id, author, channel, text, created_at
            FROM messages
            WHERE channel = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(channel)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load chat history")?;

        let mut messages: Vec<ChatMessage> = rows
            .into_iter()
            .map(|r| {
                let created_at: String = r.get("created_at");
                ChatMessage {
                    id: r.get("id"),
                    author: r.get("author"),
                    channel: r.get("channel"),
                    text: r.get("text"),
                    created_at: parse_timestamp(&created_at),
                }
            })
            .collect();

        // Reverse so oldest is first (natural reading order)
        messages.reverse();

        Ok(messages)
    }

    pub async fn count(&self, channel: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE channel = ?")
            .bind(channel)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// Rows written by other tools may carry odd timestamps; those read back as "now".
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers;

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = test_helpers::test_store().await;

        let first = store.append("alice", "general", "hi").await.unwrap();
        let second = store.append("bob", "general", "hey").await.unwrap();

        assert!(first.id > 0);
        assert!(second.id > first.id);
        assert!(second.created_at >= first.created_at);
    }

    #[tokio::test]
    async fn recent_returns_latest_in_chronological_order() {
        let store = test_helpers::test_store().await;
        for i in 1..=5 {
            store
                .append("alice", "general", &format!("M{}", i))
                .await
                .unwrap();
        }

        let msgs = store.recent("general", 3).await.unwrap();
        let texts: Vec<&str> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["M3", "M4", "M5"]);
    }

    #[tokio::test]
    async fn recent_is_scoped_to_channel() {
        let store = test_helpers::test_store().await;
        store.append("alice", "general", "in general").await.unwrap();
        store.append("alice", "random", "in random").await.unwrap();

        let general = store.recent("general", 10).await.unwrap();
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].text, "in general");

        assert!(store.recent("nowhere", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_positive_limit_uses_default() {
        let store = test_helpers::test_store().await;
        for i in 0..60 {
            store
                .append("alice", "general", &format!("msg {}", i))
                .await
                .unwrap();
        }

        let msgs = store.recent("general", 0).await.unwrap();
        assert_eq!(msgs.len(), DEFAULT_RECENT_LIMIT as usize);
        assert_eq!(msgs.last().unwrap().text, "msg 59");
        assert_eq!(store.count("general").await.unwrap(), 60);
    }

    #[tokio::test]
    async fn round_trips_timestamp() {
        let store = test_helpers::test_store().await;
        let written = store.append("alice", "general", "hi").await.unwrap();

        let read = store.recent("general", 1).await.unwrap();
        assert_eq!(read[0], written);
    }

    #[tokio::test]
    async fn append_fails_once_pool_is_closed() {
        let store = test_helpers::test_store().await;
        store.pool.close().await;
        assert!(store.append("alice", "general", "hi").await.is_err());
    }

    #[test]
    fn garbage_timestamp_reads_as_now() {
        let before = Utc::now();
        let parsed = parse_timestamp("not a time");
        assert!(parsed >= before);
    }
}

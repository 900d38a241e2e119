use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{error, warn};

use super::DbPool;
use crate::events::Event;

/// Durable copy of a published event. Rows stay unprocessed until the
/// consumer has finished with every delivery of the event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    pub id: String,
    pub name: String,
    pub payload: String,
    pub attempts: i64,
    pub processed: bool,
    pub resolution_summary: Option<String>,
    pub created_at: String,
}

impl EventRecord {
    pub async fn create(pool: &DbPool, event: &Event) -> Result<EventRecord> {
        let payload = serde_json::to_string(&event.data)?;
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            INSERT INTO events (id, name, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id, name, payload, attempts, processed, resolution_summary, created_at
        "#,
        )
        .bind(&event.id)
        .bind(&event.name)
        .bind(&payload)
        .bind(event.timestamp.to_rfc3339())
        .fetch_one(pool)
        .await
        .inspect_err(|e| error!("Failed to persist event '{}': {:?}", event.name, e))?;

        Ok(record)
    }

    pub async fn get_by_id(pool: &DbPool, event_id: &str) -> Result<Option<EventRecord>> {
        let record = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, name, payload, attempts, processed, resolution_summary, created_at
            FROM events
            WHERE id = ?1
        "#,
        )
        .bind(event_id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn get_unprocessed(pool: &DbPool) -> Result<Vec<EventRecord>> {
        let events = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, name, payload, attempts, processed, resolution_summary, created_at
            FROM events
            WHERE processed = 0
            ORDER BY created_at ASC
        "#,
        )
        .fetch_all(pool)
        .await
        .inspect_err(|e| warn!("Failed to fetch unprocessed events: {:?}", e))?;

        Ok(events)
    }

    /// Count one more delivery attempt and return the new total.
    pub async fn record_attempt(pool: &DbPool, event_id: &str) -> Result<i64> {
        let attempts = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE events
            SET attempts = attempts + 1
            WHERE id = ?1
            RETURNING attempts
        "#,
        )
        .bind(event_id)
        .fetch_one(pool)
        .await
        .inspect_err(|e| error!("Failed to record attempt for event {}: {:?}", event_id, e))?;

        Ok(attempts)
    }

    pub async fn resolve(pool: &DbPool, event_id: &str, resolution_summary: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET processed = 1, resolution_summary = ?1
            WHERE id = ?2
        "#,
        )
        .bind(resolution_summary)
        .bind(event_id)
        .execute(pool)
        .await
        .inspect_err(|e| error!("Failed to resolve event {}: {:?}", event_id, e))?;

        Ok(())
    }

    pub fn into_event(self) -> Result<Event> {
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());
        Ok(Event {
            id: self.id,
            name: self.name,
            data: serde_json::from_str(&self.payload)?,
            timestamp,
        })
    }
}

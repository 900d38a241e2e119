use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::DbPool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(anyhow::anyhow!("Unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Todo => "TODO",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TODO" => Ok(TicketStatus::Todo),
            "IN_PROGRESS" => Ok(TicketStatus::InProgress),
            "COMPLETED" => Ok(TicketStatus::Completed),
            other => Err(anyhow::anyhow!("Unknown ticket status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct TicketRow {
    id: String,
    title: String,
    description: String,
    priority: String,
    status: String,
    created_by: String,
    assigned_to: Option<String>,
    deadline: Option<String>,
    related_skills: String,
    helpful_notes: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub related_skills: Vec<String>,
    pub helpful_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = anyhow::Error;

    fn try_from(row: TicketRow) -> Result<Self> {
        let deadline = row
            .deadline
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()?
            .map(|d| d.with_timezone(&Utc));

        Ok(Ticket {
            id: row.id,
            title: row.title,
            description: row.description,
            priority: row.priority.parse()?,
            status: row.status.parse()?,
            created_by: row.created_by,
            assigned_to: row.assigned_to,
            deadline,
            related_skills: serde_json::from_str(&row.related_skills)?,
            helpful_notes: row.helpful_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Fields a senior may set when submitting a ticket. Enrichment fields are
/// only ever written by the enrichment workflow.
#[derive(Debug, Clone)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(Ticket),
    AlreadyCompleted(Ticket),
    NotAssigned,
}

const TICKET_COLUMNS: &str = "id, title, description, priority, status, created_by, assigned_to, \
     deadline, related_skills, helpful_notes, created_at, updated_at";

fn into_tickets(rows: Vec<TicketRow>) -> Result<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

impl Ticket {
    pub async fn create(pool: &DbPool, req: CreateTicketRequest) -> Result<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            INSERT INTO tickets (id, title, description, priority, status, created_by, deadline)
            VALUES (?1, ?2, ?3, ?4, 'TODO', ?5, ?6)
            RETURNING {TICKET_COLUMNS}
        "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&req.title)
        .bind(&req.description)
        .bind(req.priority.as_str())
        .bind(&req.created_by)
        .bind(
            req.deadline
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true)),
        )
        .fetch_one(pool)
        .await?;

        row.try_into()
    }

    pub async fn get_by_id(pool: &DbPool, ticket_id: &str) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"
        ))
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    pub async fn list_all(pool: &DbPool) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(pool)
        .await?;
        into_tickets(rows)
    }

    pub async fn list_by_creator(pool: &DbPool, user_id: &str) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE created_by = ?1
            ORDER BY created_at DESC, rowid DESC
        "#
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        into_tickets(rows)
    }

    pub async fn list_by_assignee(pool: &DbPool, user_id: &str) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE assigned_to = ?1
            ORDER BY created_at DESC, rowid DESC
        "#
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        into_tickets(rows)
    }

    /// Tickets nobody has picked up yet
    pub async fn list_unassigned(pool: &DbPool) -> Result<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE assigned_to IS NULL AND status = 'TODO'
            ORDER BY created_at DESC, rowid DESC
        "#
        ))
        .fetch_all(pool)
        .await?;
        into_tickets(rows)
    }

    /// Assign an unassigned ticket. Returns `None` if the ticket was already
    /// assigned (or vanished) by the time the update ran.
    pub async fn assign(pool: &DbPool, ticket_id: &str, junior_id: &str) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET assigned_to = ?1, status = 'IN_PROGRESS',
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?2 AND assigned_to IS NULL
            RETURNING {TICKET_COLUMNS}
        "#
        ))
        .bind(junior_id)
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    pub async fn unassign(pool: &DbPool, ticket_id: &str) -> Result<Option<Ticket>> {
        sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET assigned_to = NULL, status = 'TODO',
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?1 AND assigned_to IS NOT NULL
            RETURNING {TICKET_COLUMNS}
        "#
        ))
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
        .map(Ticket::try_from)
        .transpose()
    }

    /// Mark a ticket completed by its assignee and credit the junior with one
    /// unit of experience. Completing twice does not credit twice.
    pub async fn complete(
        pool: &DbPool,
        ticket_id: &str,
        junior_id: &str,
    ) -> Result<CompletionOutcome> {
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1 AND assigned_to = ?2"
        ))
        .bind(ticket_id)
        .bind(junior_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(CompletionOutcome::NotAssigned);
        };

        let current = Ticket::try_from(current)?;
        if current.status == TicketStatus::Completed {
            tx.rollback().await?;
            return Ok(CompletionOutcome::AlreadyCompleted(current));
        }

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = 'COMPLETED', updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?1
            RETURNING {TICKET_COLUMNS}
        "#
        ))
        .bind(ticket_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET experience = experience + 1 WHERE id = ?1")
            .bind(junior_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CompletionOutcome::Completed(row.try_into()?))
    }

    /// Delete a ticket owned by `creator_id`. Returns false when no such ticket exists.
    pub async fn delete_by_creator(pool: &DbPool, ticket_id: &str, creator_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?1 AND created_by = ?2")
            .bind(ticket_id)
            .bind(creator_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the enrichment fields. Returns false if the ticket no longer exists.
    pub async fn update_enrichment(
        pool: &DbPool,
        ticket_id: &str,
        related_skills: &[String],
        helpful_notes: Option<&str>,
    ) -> Result<bool> {
        let skills_json = serde_json::to_string(related_skills)?;
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET related_skills = ?1, helpful_notes = ?2,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?3
        "#,
        )
        .bind(&skills_json)
        .bind(helpful_notes)
        .bind(ticket_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Ticket persistence as seen by the enrichment workflow.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn find_by_id(&self, ticket_id: &str) -> Result<Option<Ticket>>;

    /// Returns false if the ticket does not exist.
    async fn update_enrichment(
        &self,
        ticket_id: &str,
        related_skills: &[String],
        helpful_notes: Option<&str>,
    ) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteTicketStore {
    db: DbPool,
}

impl SqliteTicketStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn find_by_id(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        Ticket::get_by_id(&self.db, ticket_id).await
    }

    async fn update_enrichment(
        &self,
        ticket_id: &str,
        related_skills: &[String],
        helpful_notes: Option<&str>,
    ) -> Result<bool> {
        Ticket::update_enrichment(&self.db, ticket_id, related_skills, helpful_notes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_upper_snake_case() {
        assert_eq!(TicketStatus::InProgress.as_str(), "IN_PROGRESS");
        assert_eq!(
            serde_json::to_value(TicketStatus::InProgress).unwrap(),
            "IN_PROGRESS"
        );
        assert_eq!(
            "COMPLETED".parse::<TicketStatus>().unwrap(),
            TicketStatus::Completed
        );
        assert!("done".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn row_conversion_parses_json_and_deadline() {
        let row = TicketRow {
            id: "t1".to_string(),
            title: "Style the homepage".to_string(),
            description: "Update CSS".to_string(),
            priority: "high".to_string(),
            status: "TODO".to_string(),
            created_by: "u1".to_string(),
            assigned_to: None,
            deadline: Some("2026-01-02T03:04:05.000Z".to_string()),
            related_skills: r#"["css","html"]"#.to_string(),
            helpful_notes: None,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        };

        let ticket = Ticket::try_from(row).unwrap();
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.related_skills, vec!["css", "html"]);
        assert_eq!(
            ticket.deadline.unwrap().to_rfc3339(),
            "2026-01-02T03:04:05+00:00"
        );
    }
}

//! Shared fixtures: a throwaway SQLite database and seeded rows.
#![allow(dead_code)]

use std::time::Duration;

use helpdesk_flow::{
    config::{Config, DispatcherConfig, SkillExtractorConfig},
    database::{
        create_pool,
        tickets::{CreateTicketRequest, Priority, Ticket},
        users::{CreateUserRequest, Role, User},
        DbPool,
    },
    events::RunReport,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub struct TestDb {
    pub pool: DbPool,
    pub path: String,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("helpdesk.db").display().to_string();
    let pool = create_pool(&format!("sqlite:{}?mode=rwc", path))
        .await
        .expect("test database");
    TestDb {
        pool,
        path,
        _dir: dir,
    }
}

pub fn test_config(database_path: &str) -> Config {
    Config {
        database_path: database_path.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_expires_in: Duration::from_secs(3600),
        bcrypt_cost: 4,
        no_recover: true,
        skills: SkillExtractorConfig::default(),
        dispatcher: DispatcherConfig {
            redelivery_backoff: Duration::from_millis(10),
            ..DispatcherConfig::default()
        },
    }
}

pub async fn seed_user(pool: &DbPool, email: &str, role: Role) -> User {
    User::create(
        pool,
        CreateUserRequest {
            email: email.to_string(),
            password_hash: "not-a-real-hash".to_string(),
            role,
            skills: Vec::new(),
        },
    )
    .await
    .expect("seed user")
}

pub async fn seed_ticket(pool: &DbPool, created_by: &str, title: &str, description: &str) -> Ticket {
    Ticket::create(
        pool,
        CreateTicketRequest {
            title: title.to_string(),
            description: description.to_string(),
            priority: Priority::Medium,
            deadline: None,
            created_by: created_by.to_string(),
        },
    )
    .await
    .expect("seed ticket")
}

/// Wait for the first report about `event_id` that will not be retried.
pub async fn final_report(
    reports: &mut broadcast::Receiver<RunReport>,
    event_id: &str,
) -> RunReport {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = reports.recv().await.expect("report channel open");
            if report.event_id == event_id && !report.will_retry {
                return report;
            }
        }
    })
    .await
    .expect("workflow run finished in time")
}

/// Poll until the ticket has been enriched.
pub async fn wait_for_enrichment(pool: &DbPool, ticket_id: &str) -> Ticket {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let ticket = Ticket::get_by_id(pool, ticket_id)
                .await
                .expect("ticket query")
                .expect("ticket exists");
            if ticket.helpful_notes.is_some() || !ticket.related_skills.is_empty() {
                return ticket;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("ticket enriched in time")
}

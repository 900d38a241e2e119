use anyhow::Context;
use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    api::create_api_router,
    auth::JwtManager,
    config::Config,
    database::{tickets::SqliteTicketStore, DbPool},
    events::EventDispatcher,
    skills::SkillExtractor,
    workflow::{SqliteStepStore, StepRunner, TicketEnrichmentWorkflow, WorkflowRegistry},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub dispatcher: EventDispatcher,
    pub jwt: Arc<JwtManager>,
}

impl AppState {
    /// Wire the enrichment workflow to the dispatcher and start its consumer.
    /// Must be called inside a tokio runtime.
    pub fn build(config: Config, db: DbPool) -> anyhow::Result<Self> {
        let extractor = Arc::new(SkillExtractor::new(config.skills.clone())?);
        let tickets = Arc::new(SqliteTicketStore::new(db.clone()));

        let mut registry = WorkflowRegistry::new();
        registry.register(Arc::new(TicketEnrichmentWorkflow::new(tickets, extractor)))?;

        let runner = StepRunner::new(Arc::new(SqliteStepStore::new(db.clone())));
        let (dispatcher, _consumer) =
            EventDispatcher::start(db.clone(), registry, runner, config.dispatcher.clone());

        let jwt = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expires_in));

        Ok(Self {
            config,
            db,
            dispatcher,
            jwt,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", create_api_router())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MiB
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let db = crate::database::create_pool(&config.database_url()).await?;
    let state = AppState::build(config.clone(), db.clone())?;

    if !config.no_recover {
        match state.dispatcher.redeliver_pending().await {
            Ok(count) => info!("Recovery queued {} unprocessed event(s)", count),
            Err(e) => error!("Failed to redeliver unprocessed events: {:#}", e),
        }
    }

    let app = create_router(state);

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Server listening on {}", address);

    match axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => error!("Server error: {}", e),
    }

    crate::database::close_pool(db).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    match crate::database::schema::get_database_info(&state.db).await {
        Ok(version) => Json(json!({
            "status": "healthy",
            "service": "helpdesk-flow",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "database": {
                "version": version,
                "status": "connected"
            }
        })),
        Err(e) => {
            error!("Database health check failed: {}", e);
            Json(json!({
                "status": "unhealthy",
                "service": "helpdesk-flow",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "error": "Database connection failed"
            }))
        }
    }
}

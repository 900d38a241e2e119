use anyhow::Result;
use clap::Parser;
use helpdesk_flow::{
    config::{parse_list, Config, DispatcherConfig, SkillExtractorConfig},
    database::logs_dir,
    server::run_server,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "helpdesk-flow")]
#[command(about = "Helpdesk ticket service with asynchronous ticket enrichment")]
struct Args {
    /// Database file path
    #[arg(long, env = "DATABASE_PATH", default_value = "./.helpdesk-flow/helpdesk.db")]
    database_path: String,

    /// Server host
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Secret used to sign session tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Session token lifetime, e.g. "7d" or "12h"
    #[arg(long, env = "JWT_EXPIRES_IN", default_value = "7d")]
    jwt_expires_in: humantime::Duration,

    /// bcrypt work factor for password hashes
    #[arg(long, default_value = "10")]
    bcrypt_cost: u32,

    /// Credential for the classification endpoint; keyword fallback when unset
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Classification model name
    #[arg(long, env = "GEMINI_MODEL", default_value = helpdesk_flow::config::DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Classification API base URL
    #[arg(long, default_value = helpdesk_flow::config::DEFAULT_GEMINI_BASE_URL)]
    gemini_base_url: String,

    /// Upper bound on one classification request, in seconds
    #[arg(long, default_value = "20")]
    skill_timeout_secs: u64,

    /// Comma-separated keywords scanned by the fallback extractor
    #[arg(long, default_value = "react,node,express,mongodb,css,html,typescript")]
    skill_vocabulary: String,

    /// Maximum workflow runs executing at once
    #[arg(long, default_value = "8")]
    max_concurrent_runs: usize,

    /// Deliveries of one event before a retryable failure becomes final
    #[arg(long, default_value = "3")]
    max_delivery_attempts: u32,

    /// Base delay between redeliveries, multiplied by the attempt number
    #[arg(long, default_value = "500")]
    redelivery_backoff_ms: u64,

    /// Do not redeliver unprocessed events on startup
    #[arg(long)]
    no_recover: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with both console and file logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let logs_dir = logs_dir(&args.database_path);
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter.clone()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    let Some(jwt_secret) = args.jwt_secret.filter(|s| !s.is_empty()) else {
        anyhow::bail!("JWT_SECRET must be set (flag --jwt-secret or environment)");
    };

    info!("Starting Helpdesk Flow");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", args.database_path);
    info!("Server: {}:{}", args.host, args.port);
    info!("Recovery disabled: {}", args.no_recover);

    let config = Config {
        database_path: args.database_path,
        host: args.host,
        port: args.port,
        jwt_secret,
        jwt_expires_in: args.jwt_expires_in.into(),
        bcrypt_cost: args.bcrypt_cost,
        no_recover: args.no_recover,
        skills: SkillExtractorConfig {
            model: args.gemini_model,
            base_url: args.gemini_base_url,
            timeout: Duration::from_secs(args.skill_timeout_secs),
            vocabulary: parse_list(&args.skill_vocabulary),
            ..SkillExtractorConfig::default()
        }
        .with_api_key(args.gemini_api_key),
        dispatcher: DispatcherConfig {
            max_concurrent_runs: args.max_concurrent_runs,
            max_delivery_attempts: args.max_delivery_attempts,
            redelivery_backoff: Duration::from_millis(args.redelivery_backoff_ms),
            ..DispatcherConfig::default()
        },
    };

    run_server(config).await?;

    Ok(())
}

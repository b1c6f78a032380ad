//! tagtrail-server - attribution and daily aggregation service
//!
//! `serve` (the default) runs the HTTP API. `aggregate` runs the daily rollup
//! once and exits, for schedulers that invoke a command instead of a URL.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tagtrail_common::config::{self, Overrides, Settings};
use tagtrail_common::db::init_database;
use tagtrail_common::time;
use tagtrail_server::aggregation::AggregationEngine;
use tagtrail_server::{build_router, AppState};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tagtrail-server")]
#[command(about = "Visitor attribution and daily aggregation service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "TAGTRAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long, env = config::ENV_ROOT_FOLDER)]
    root_folder: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = config::ENV_BIND)]
    bind: Option<String>,

    /// Shared secret for operator endpoints
    #[arg(long, env = config::ENV_CRON_SECRET, hide_env_values = true)]
    cron_secret: Option<String>,

    /// Enable the daily aggregation endpoint
    #[arg(long)]
    enable_daily_aggregation: bool,

    /// Score at which a visitor counts as a power user
    #[arg(long, env = config::ENV_POWER_USER_THRESHOLD)]
    power_user_threshold: Option<i64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Run the daily rollup once
    Aggregate {
        /// Day to aggregate (YYYY-MM-DD), default yesterday UTC
        #[arg(long, conflicts_with_all = ["from", "to"])]
        date: Option<String>,
        /// First day of a backfill range
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Last day of a backfill range, inclusive
        #[arg(long, requires = "from")]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tagtrail_server=info,tagtrail_common=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tagtrail-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let toml_config =
        config::load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let overrides = Overrides {
        root_folder: args.root_folder,
        bind: args.bind,
        cron_secret: args.cron_secret,
        daily_aggregation_enabled: args.enable_daily_aggregation.then_some(true),
        power_user_threshold: args.power_user_threshold,
    };
    let settings = Settings::resolve(&overrides, toml_config);

    let db_path = settings.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, settings).await,
        Command::Aggregate { date, from, to } => {
            let engine = AggregationEngine::new(pool, settings.power_user_threshold);
            match (from, to) {
                (Some(from), Some(to)) => {
                    let summaries = engine
                        .aggregate_range(parse_date(&from)?, parse_date(&to)?)
                        .await?;
                    info!("Backfilled {} day(s)", summaries.len());
                }
                _ => {
                    let date = date.as_deref().map(parse_date).transpose()?;
                    engine.aggregate_day(date).await?;
                }
            }
            Ok(())
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    time::parse_date(raw).with_context(|| format!("Invalid date {:?}", raw))
}

async fn serve(pool: sqlx::SqlitePool, settings: Settings) -> Result<()> {
    let bind = settings.bind.clone();

    if settings.cron_secret.is_none() {
        info!("No operator secret configured; operator endpoints will reject all requests");
    }
    info!(
        "Daily aggregation endpoint {}",
        if settings.daily_aggregation_enabled { "enabled" } else { "disabled" }
    );

    let app = build_router(AppState::new(pool, settings));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("tagtrail-server listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel_scheduler::SchedulerConfig;
use sentinel_scheduler::app::{build_scheduler, serve_api};

#[derive(Parser)]
#[command(name = "sentinel-scheduler")]
#[command(about = "Subscription lifecycle and panel health scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background loops and the operator API (default)
    Serve,
    /// Run one main cycle and exit
    Tick,
    /// Probe the panel API once, applying maintenance transitions
    Probe,
    /// Print the monitor status
    Status,
    /// Toggle maintenance mode manually
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
}

#[derive(Subcommand)]
enum MaintenanceAction {
    /// Enable maintenance mode
    On {
        /// Shown to operators in the status view
        #[arg(long)]
        reason: Option<String>,
    },
    /// Disable maintenance mode
    Off,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("⚠️  Warning: Failed to load .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| ".".to_string());
    let file_appender = tracing_appender::rolling::never(log_dir, "scheduler.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sentinel_scheduler=debug,sentinel_db=info,axum=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    let config = SchedulerConfig::load()?;
    let scheduler = build_scheduler(&config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            scheduler.start().await;

            let shutdown = CancellationToken::new();
            let api_task = match (config.api.listen.clone(), config.api.token.clone()) {
                (Some(listen), Some(token)) => {
                    let scheduler = scheduler.clone();
                    let shutdown = shutdown.clone();
                    Some(tokio::spawn(async move {
                        serve_api(scheduler, &listen, &token, shutdown).await
                    }))
                }
                _ => {
                    info!("API_LISTEN not set: operator API disabled");
                    None
                }
            };

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            shutdown.cancel();
            scheduler.stop().await;
            if let Some(task) = api_task {
                task.await??;
            }
        }
        Commands::Tick => {
            let tick = scheduler.run_once(Utc::now()).await?;
            print_json(&tick)?;
        }
        Commands::Probe => {
            let report = scheduler.force_check().await?;
            print_json(&report)?;
        }
        Commands::Status => {
            print_json(&scheduler.get_status().await)?;
        }
        Commands::Maintenance { action } => {
            let snapshot = match action {
                MaintenanceAction::On { reason } => scheduler.set_maintenance(true, reason).await,
                MaintenanceAction::Off => scheduler.set_maintenance(false, None).await,
            };
            print_json(&snapshot)?;
        }
    }

    Ok(())
}

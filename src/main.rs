use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentic_reasoning_core::{
    config::{Config, LogFormat},
    risk::AlertState,
    server::{AppState, RpcServer},
    storage::{SqliteStorage, Storage},
};

/// Reasoning, decision and risk engine.
#[derive(Parser, Debug)]
#[command(name = "agentic-reasoning-core", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Serve JSON-RPC requests on stdin/stdout (default)
    Serve {
        /// Run without a database
        #[arg(long)]
        no_storage: bool,
    },

    /// List persisted risk alerts
    Alerts {
        /// Filter by state: open, acknowledged, resolved
        #[arg(long)]
        state: Option<String>,
    },

    /// Show the most recent reasoning traces
    Traces {
        /// Maximum number of traces to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    match cli.command.unwrap_or(Command::Serve { no_storage: false }) {
        Command::Serve { no_storage } => serve(config, no_storage).await,
        Command::Alerts { state } => {
            let state = state
                .map(|s| s.parse::<AlertState>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let storage = SqliteStorage::new(&config.database).await?;
            for alert in storage.list_alerts(state).await? {
                println!(
                    "{}  {:<12}  score={:.3}  {}",
                    alert.id, alert.state, alert.score, alert.message
                );
            }
            Ok(())
        }
        Command::Traces { limit } => {
            let storage = SqliteStorage::new(&config.database).await?;
            for trace in storage.list_reasoning_traces(limit).await? {
                println!(
                    "{}  {:<9}  confidence={:.3}  steps={}  {}",
                    trace.chain_id, trace.state, trace.confidence, trace.step_count, trace.question
                );
            }
            Ok(())
        }
    }
}

async fn serve(config: Config, no_storage: bool) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Agentic reasoning core starting..."
    );

    // Initialize storage
    let storage: Option<Arc<dyn Storage>> = if no_storage {
        info!("Persistence disabled");
        None
    } else {
        match SqliteStorage::new(&config.database).await {
            Ok(s) => {
                info!(path = %config.database.path.display(), "Database initialized");
                Some(Arc::new(s))
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize database");
                return Err(e.into());
            }
        }
    };

    let state = match AppState::new(config, storage) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            return Err(e.into());
        }
    };
    state.start_background()?;

    let server = RpcServer::new(Arc::clone(&state));

    info!("Server ready, waiting for requests on stdin...");

    let result = server.run().await;
    state.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provider_relay::config::{load_config_from, Settings};
use provider_relay::health::HealthRegistry;
use provider_relay::metrics::{self, Metrics};
use provider_relay::supervisor::{declare_all, RabbitMqConnector, Supervisor};

#[derive(Parser)]
#[command(name = "provider_relay", version, about = "Routes payment and shipping requests to provider workers")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to config/provider_relay.*
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run routers and workers until Ctrl-C
    Run {
        /// Only start the named components (repeatable)
        #[arg(long, value_name = "NAME")]
        only: Vec<String>,
    },
    /// Declare every configured queue and exit
    Topology,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=provider_relay=trace provider_relay run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,provider_relay=debug")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_config_from(cli.config.as_deref()).context("failed to load configuration")?;
    let connector = RabbitMqConnector::new(
        settings.broker.url.clone(),
        settings.broker.prefetch,
        settings.broker.retry_config(),
    );

    match cli.command {
        Command::Run { only } => run(settings, connector, &only).await,
        Command::Topology => {
            let declared = declare_all(&settings, &connector).await?;
            tracing::info!(queues = declared, "✅ Topology declared");
            Ok(())
        }
    }
}

async fn run(settings: Settings, connector: RabbitMqConnector, only: &[String]) -> anyhow::Result<()> {
    tracing::info!("🚀 Starting provider relay");

    let metrics = Arc::new(Metrics::new()?);
    let health = HealthRegistry::new();
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    if settings.metrics.enabled {
        // actix-web runs on its own system in a dedicated thread
        let registry = metrics.registry().clone();
        let health = health.clone();
        let port = settings.metrics.port;
        std::thread::Builder::new()
            .name("metrics-server".to_string())
            .spawn(move || {
                let system = actix_web::rt::System::new();
                if let Err(e) = system.block_on(metrics::start_metrics_server(registry, health, port)) {
                    tracing::error!("Metrics server error: {}", e);
                }
            })
            .context("failed to start metrics thread")?;
    }

    let supervisor = Supervisor::new(settings, connector, metrics, health);
    supervisor
        .run(only, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Unable to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

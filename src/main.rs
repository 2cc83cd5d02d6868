use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bibliored::actors;
use bibliored::config::{
    CcMode, ConsumerConfig, CoordinatorConfig, LoanActorConfig, StorageConfig,
};
use bibliored::coordinator;
use bibliored::domain::SiteId;
use bibliored::ports::BoxError;
use bibliored::storage;

/// Two-site distributed library transaction service.
#[derive(Parser)]
#[command(name = "bibliored", version)]
struct Cli {
    /// Human-readable log output.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Storage site process: storage manager, operation log, replication,
    /// and heartbeat/health.
    Storage {
        #[arg(long, default_value = "./data/siteA")]
        data_dir: PathBuf,
        #[arg(long, default_value = "A")]
        node_id: SiteId,
    },
    /// Central coordinator: client entry point and dispatch.
    Coordinator {
        /// Execution mode: serial or threaded.
        #[arg(long)]
        mode: Option<CcMode>,
        /// Worker count in threaded mode.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Loan actor: synchronous PRESTAR processor.
    ActorLoan,
    /// Renew actor: RENOVACION topic consumer.
    ActorRenew,
    /// Return actor: DEVOLUCION topic consumer.
    ActorReturn,
}

fn init_tracing(pretty: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bibliored=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if pretty {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    let result: Result<(), BoxError> = match cli.command {
        Command::Storage { data_dir, node_id } => {
            let config = StorageConfig {
                data_dir,
                node_id,
                ..StorageConfig::from_env()
            };
            storage::server::run(config, shutdown).await
        }
        Command::Coordinator { mode, workers } => {
            let mut config = CoordinatorConfig::from_env();
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            coordinator::run(config, shutdown).await
        }
        Command::ActorLoan => actors::loan::run(LoanActorConfig::from_env(), shutdown).await,
        Command::ActorRenew => {
            actors::run_renew_actor(ConsumerConfig::from_env(), shutdown).await
        }
        Command::ActorReturn => {
            actors::run_return_actor(ConsumerConfig::from_env(), shutdown).await
        }
    };

    if let Err(error) = result {
        tracing::error!(%error, "startup failed");
        std::process::exit(1);
    }
}

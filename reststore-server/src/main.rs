mod config;
use clap::{Parser, Subcommand};
use config::{Config, StoreBackend};
use reststore_core::{MemoryScriptStore, RedisScriptStore, RestStorage, ScriptStore, SystemClock};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use server::run_server;

#[derive(Parser)]
#[command(name = "reststore")]
#[command(about = "Hierarchical JSON document storage on top of Redis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the resource tree over HTTP
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

async fn build_store(cfg: &Config) -> reststore_core::Result<Arc<dyn ScriptStore>> {
    match cfg.server.backend {
        StoreBackend::Redis => {
            let store = RedisScriptStore::connect(&cfg.redis.url).await?;
            tracing::info!("Connected to Redis url={}", cfg.redis.url);
            let store: Arc<dyn ScriptStore> = Arc::new(store);
            Ok(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-process store; resources are lost on restart");
            let store: Arc<dyn ScriptStore> = Arc::new(MemoryScriptStore::new());
            Ok(store)
        }
    }
}

async fn run_with_config(cfg: Config) {
    let store = match build_store(&cfg).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!("Failed to open backing store: {}", error);
            std::process::exit(1);
        }
    };

    let storage = RestStorage::new(store, cfg.storage.clone(), Arc::new(SystemClock));

    if let Err(error) = run_server(cfg, storage).await {
        tracing::error!("Server error: {}", error);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reststore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Reststore server with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(error) => {
                    tracing::error!("Failed to load config: {}", error);
                    std::process::exit(1);
                }
            };

            run_with_config(cfg).await;
        }
    }
}

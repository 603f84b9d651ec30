use anyhow::Context;
use authz_engine::AuthzEngine;
use authz_server::config::ServerConfig;
use authz_server::grpc;
use authz_store::{MemoryStore, PostgresStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "authz-server", about = "Relationship-based authorization service")]
struct Cli {
    /// Path to a configuration file layered over config/default.toml
    #[arg(long, env = "AUTHZ_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let engine = build_engine(&config).await?;
    let addr = config.socket_addr()?;
    grpc::serve(
        addr,
        engine,
        Duration::from_secs(config.request_timeout_secs),
        shutdown_signal(),
    )
    .await
}

async fn build_engine(config: &ServerConfig) -> anyhow::Result<Arc<AuthzEngine>> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(
                PostgresStore::connect(url, config.database_pool_size)
                    .await
                    .context("connecting to PostgreSQL")?,
            );
            store.migrate().await.context("running store migrations")?;
            info!("using the PostgreSQL store");
            Ok(Arc::new(AuthzEngine::new(
                store.clone(),
                store,
                config.engine_config(),
            )))
        }
        None => {
            warn!("no database_url configured; using the in-memory store (state is not persisted)");
            let store = Arc::new(MemoryStore::new());
            Ok(Arc::new(AuthzEngine::new(
                store.clone(),
                store,
                config.engine_config(),
            )))
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}

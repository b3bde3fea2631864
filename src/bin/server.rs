use anyhow::{Context, Result};
use clap::Parser;
use rustacl::acl::{AclManager, AclRefresher, FileAclStorage, FileDumpSource};
use rustacl::config::NodeRole;
use rustacl::metrics::AclMetrics;
use rustacl::Config;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rustacl-server")]
#[command(about = "ACL rule engine: serves authorization for one zone")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/acl.toml")]
    config: String,

    /// Create the ACL table before loading it
    #[arg(long)]
    bootstrap: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Loading configuration from: {}", args.config);
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    config.validate().context("invalid configuration")?;

    info!("Zone {} running as {:?}", config.node.zone_id, config.node.role);

    let metrics = AclMetrics::new().context("failed to register metrics")?;
    let storage = Arc::new(FileAclStorage::new(&config.storage.path));
    let manager = Arc::new(AclManager::new(&config, storage, metrics.clone()));

    if args.bootstrap {
        manager.bootstrap().context("failed to bootstrap the ACL table")?;
        info!("ACL table ready at {}", config.storage.path.display());
    }

    let loaded = manager.start().context("failed to load ACL rules")?;
    info!("ACL manager started with {} rules", loaded);

    let refresher = match (config.node.role, &config.refresh.dump_path) {
        (NodeRole::Follower, Some(dump_path)) => Some(AclRefresher::spawn(
            manager.clone(),
            Arc::new(FileDumpSource::new(dump_path)),
            config.refresh.interval(),
        )),
        _ => None,
    };

    // Leaders publish their dump on the refresh period when a dump path is set
    let publish_path = match config.node.role {
        NodeRole::Leader => config.refresh.dump_path.clone(),
        NodeRole::Follower => None,
    };

    let mut ticker = tokio::time::interval(config.refresh.interval());
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick(), if publish_path.is_some() => {
                if let Some(path) = &publish_path {
                    if let Err(e) = publish_dump(&manager, path).await {
                        warn!("Failed to publish ACL dump to {}: {:#}", path.display(), e);
                    }
                }
            }
        }
    }

    if let Some(refresher) = refresher {
        let health = refresher.health();
        refresher.shutdown().await;
        info!(
            "Refresh ran {} cycles, {} consecutive failures at shutdown",
            health.cycles, health.consecutive_failures
        );
    }

    match metrics.encode_text() {
        Ok(text) => info!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    info!("rustacl-server stopped");
    Ok(())
}

async fn publish_dump(manager: &AclManager, path: &Path) -> Result<()> {
    let json = manager.dump().to_json()?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

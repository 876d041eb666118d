//! ObjectIO OSD - Object Storage Daemon
//!
//! Serves this node's drives to the rest of the cluster.

use anyhow::{Context, Result};
use clap::Parser;
use objectio_common::Config;
use objectio_common::config::{EndpointConfig, PoolConfig};
use objectio_osd::{Bootstrap, DiskRegistry, build_router, drive_servers};
use objectio_storage::LocalDiskOpener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "objectio-osd")]
#[command(about = "ObjectIO Object Storage Daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/objectio/osd.toml")]
    config: String,

    /// Listen address for the storage API
    #[arg(short, long)]
    listen: Option<String>,

    /// Drive paths to serve, as a single local pool with one set
    #[arg(long)]
    disks: Vec<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Internode access key
    #[arg(long, env = "OBJECTIO_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    /// Internode secret key
    #[arg(long, env = "OBJECTIO_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
}

/// Missing file means defaults; an unreadable one is reported and ignored
fn load_config(path: &str) -> Config {
    if !Path::new(path).exists() {
        return Config::default();
    }
    match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| Config::from_toml(&s).map_err(|e| e.to_string()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to parse config file {path}: {e}");
            Config::default()
        }
    }
}

/// Command-line values take precedence over the file
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(listen) = &args.listen {
        config.node.listen.clone_from(listen);
    }
    if let Some(level) = &args.log_level {
        config.node.log_level.clone_from(level);
    }
    if let Some(key) = &args.access_key {
        config.credentials.access_key.clone_from(key);
    }
    if let Some(key) = &args.secret_key {
        config.credentials.secret_key.clone_from(key);
    }
    if !args.disks.is_empty() {
        config.pools = vec![PoolConfig {
            set_count: 1,
            drives_per_set: args.disks.len(),
            endpoints: args
                .disks
                .iter()
                .enumerate()
                .map(|(disk, path)| EndpointConfig {
                    path: path.clone(),
                    set: 0,
                    disk,
                    local: true,
                })
                .collect(),
        }];
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config);
    apply_overrides(&mut config, &args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.node.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ObjectIO OSD");
    info!("Config file: {}", args.config);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let endpoints = config.local_endpoints();
    if endpoints.is_empty() {
        error!(
            "No local drives configured. Use --disks or configure pools in {}",
            args.config
        );
        std::process::exit(1);
    }
    info!(
        "Local drives: {:?}",
        endpoints.iter().map(|e| e.path.display().to_string()).collect::<Vec<_>>()
    );

    let registry = Arc::new(DiskRegistry::new(&config.topology()));
    let bootstrap = Bootstrap::new(
        Arc::clone(&registry),
        Arc::new(LocalDiskOpener::new(config.storage.direct_io)),
        config.storage.retry_interval(),
    );
    let pending = match bootstrap.run(endpoints).await {
        Ok(pending) => pending,
        Err(fatal) => {
            error!("Unable to use the drives: {}", fatal);
            let hint = fatal.hint();
            if !hint.is_empty() {
                error!("{}", hint);
            }
            std::process::exit(1);
        }
    };
    if !pending.is_empty() {
        warn!(
            "{} drive(s) not attached yet, retrying every {:?}",
            pending.len(),
            config.storage.retry_interval()
        );
    }

    let servers = drive_servers(&config, &registry);
    let drive_count = servers.len();
    let app = build_router(servers);

    let listener = TcpListener::bind(&config.node.listen)
        .await
        .with_context(|| format!("Invalid listen address {}", config.node.listen))?;
    info!(
        "Serving {} drive(s) on {}",
        drive_count, config.node.listen
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("OSD shut down gracefully");
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use app_worker::config::{self, FileConfig, ProxyConfig, WorkerConfig};
use app_worker::{LifetimeMultiplexer, WsConnector};
use script_importer::HttpScriptImporter;

#[derive(Parser)]
#[command(name = "rn-app-worker")]
#[command(about = "Runs a React Native app's JavaScript for a remote debugger")]
struct Args {
    /// Root of the React Native project
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Packager host and port (overrides proxy.packager_host)
    #[arg(long)]
    packager: Option<String>,

    /// Port of the debug adapter (overrides worker.debug_adapter_port)
    #[arg(long)]
    debug_adapter_port: Option<u16>,

    /// Client name reported to the debugger proxy (overrides proxy.client_name)
    #[arg(long)]
    name: Option<String>,

    /// Use the debuggerWorker.js already in the sources storage path
    #[arg(long)]
    skip_download: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "app_worker=debug,script_importer=debug,info"
    } else {
        "app_worker=info,script_importer=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let storage = config::sources_storage_path(&args.project_root);
    let mut fc: FileConfig = config::load_config(&storage)
        .extract()
        .context("Failed to load app worker configuration")?;
    if let Some(packager) = args.packager {
        fc.proxy.packager_host = packager;
    }
    if let Some(name) = args.name {
        fc.proxy.client_name = name;
    }
    if let Some(port) = args.debug_adapter_port {
        fc.worker.debug_adapter_port = port;
    }

    let proxy = ProxyConfig::from_file(&fc.proxy);
    let worker = WorkerConfig::from_file(&fc.worker, storage.clone());

    let importer = HttpScriptImporter::new(storage.clone());
    if args.skip_download {
        info!("Using debugger worker at {}", worker.entry_path().display());
    } else {
        let path = importer
            .download_debugger_worker(&proxy.packager_host, &worker.entry_file)
            .await
            .with_context(|| {
                format!(
                    "Failed to download the debugger worker from {}",
                    proxy.packager_host
                )
            })?;
        info!("Downloaded debugger worker to {}", path.display());
    }

    info!(
        "Connecting to the debugger proxy at {}",
        proxy.debugger_proxy_url()
    );
    let multiplexer =
        LifetimeMultiplexer::new(proxy, worker, Arc::new(WsConnector), Arc::new(importer));
    let (handle, started) = multiplexer.start(false);
    if let Err(e) = started.await {
        warn!("Couldn't connect to the debugger proxy yet, will keep retrying: {}", e);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

//! NPU Fault Manager (NFM)
//!
//! Cluster-level fault manager for NPU training jobs. Watches the per-node
//! device, switch and node fault ConfigMaps, correlates faults with the jobs
//! placed on those nodes, and filters out faults a job can recover from in place.

mod cli;
mod config;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::Config;
use nfm_core::model::DEVICE_INFO_PREFIX;
use nfm_core::{FaultManager, InMemoryJobRegistry, RawDeviceInfo, ReportInfoCollector};
use nfm_k8s::{ConfigMapWatcher, K8sClient};

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Build the fault manager from configuration
fn build_manager(config: &Config) -> Result<Arc<FaultManager>> {
    let jobs = match &config.job_table {
        Some(path) => {
            let registry = InMemoryJobRegistry::from_file(path)
                .with_context(|| format!("Failed to load job table from {:?}", path))?;
            info!(path = ?path, jobs = registry.len(), "Job table loaded");
            registry
        }
        None => {
            warn!("No job table configured, no job is enrolled for in-place recovery");
            InMemoryJobRegistry::new()
        }
    };

    Ok(Arc::new(FaultManager::new(
        config.to_manager_config(),
        Arc::new(jobs),
        Arc::new(ReportInfoCollector::new()),
    )))
}

/// Run the fault manager until shutdown
async fn run(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    info!(namespace = %config.namespace, "Starting NFM");

    let manager = build_manager(&config)?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    if config.watch_configmaps {
        let client = K8sClient::new().await?;
        client
            .health_check(&config.namespace)
            .await
            .context("Kubernetes API server is not reachable")?;

        let watcher = ConfigMapWatcher::new(client, config.namespace.clone(), manager.clone());
        let watch_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(watch_shutdown).await {
                error!(error = %e, "Configmap watcher failed");
            }
        });
    } else {
        info!("Configmap watching disabled");
    }

    manager.run(shutdown_rx).await?;

    info!("NFM shutdown complete");
    Ok(())
}

/// Run one reconciliation pass over a device info snapshot and print the result
fn run_once(config: &Config, snapshot: &Path) -> Result<()> {
    let content = std::fs::read_to_string(snapshot)
        .with_context(|| format!("Failed to read snapshot file: {:?}", snapshot))?;
    let devices = parse_snapshot(&content)?;

    let manager = build_manager(config)?;
    for raw in &devices {
        if let Err(e) = manager.on_device_info_update(raw) {
            warn!(cm = %raw.cm_name, error = %e, "Device info rejected");
        }
    }
    manager.process_all();

    let processed = manager.device_infos();
    println!(
        "{}",
        serde_json::to_string_pretty(&processed).context("Failed to encode result")?
    );
    info!(nodes = processed.len(), "Single pass complete");
    Ok(())
}

/// Parse a node name to device info map, naming entries without a CmName
/// after their node
fn parse_snapshot(content: &str) -> Result<Vec<RawDeviceInfo>> {
    let devices: BTreeMap<String, RawDeviceInfo> =
        serde_json::from_str(content).context("Failed to parse device info snapshot")?;

    Ok(devices
        .into_iter()
        .map(|(node, mut raw)| {
            if raw.cm_name.is_empty() {
                raw.cm_name = format!("{}{}", DEVICE_INFO_PREFIX, node);
            }
            raw
        })
        .collect())
}

/// Start the Prometheus metrics HTTP server
async fn start_metrics_server(port: u16) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = port, "Metrics server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let metrics_output = prometheus::TextEncoder::new()
                .encode_to_string(&prometheus::gather())
                .unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics_output.len(),
                metrics_output
            );

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Resolve when Ctrl+C or SIGTERM arrives
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "NFM starting");

    // Load configuration
    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        warn!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    info!(
        device_interval = ?config.device_interval,
        restart_in_place_timeout = ?config.restart_in_place_timeout,
        max_node_num = config.max_node_num,
        "Configuration loaded"
    );

    if cli.once {
        if let Some(snapshot) = &cli.snapshot {
            info!(snapshot = ?snapshot, "Running single reconciliation pass (--once mode)");
            return run_once(&config, snapshot);
        }
    }

    // Setup shutdown signal handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Run main loop
    run(config, shutdown_rx).await
}

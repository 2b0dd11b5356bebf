//! Model Conductor Daemon
//!
//! Long-running host for the model-serving core. Loads configuration, builds
//! the registry, runs cache/health/snapshot maintenance, logs alerts and
//! periodically publishes Prometheus metrics.
//!
//! # Usage
//!
//! ```bash
//! # Default config ($XDG_CONFIG_HOME/model-conductor/config.toml, or built-ins)
//! model-conductor-daemon
//!
//! # Explicit config and a textfile-collector output
//! model-conductor-daemon --config ./serving.toml --metrics-file /var/lib/node/model.prom
//!
//! # With verbose logging
//! model-conductor-daemon --log-level debug
//! ```
//!
//! # Environment Variables
//!
//! - `MODEL_CONDUCTOR_CONFIG`: Config file path
//! - `MODEL_CONDUCTOR_CACHE_CAPACITY`: Cache capacity override
//! - `MODEL_CONDUCTOR_CACHE_TTL_SECS`: Cache TTL override
//! - `MODEL_CONDUCTOR_DEFAULT_STRATEGY`: Default selection strategy override
//! - `RUST_LOG`: Log filter (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (stops maintenance, flushes metrics)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use model_conductor::{
    load_config, load_config_from_path, spawn_maintenance, Alert, ConfigSource, ModelRegistry,
    ServingConfig, Severity,
};

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "model-conductor-daemon", version, about)]
struct Args {
    /// Config file (defaults to the XDG config location)
    #[arg(long, short, env = "MODEL_CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "model_conductor=info,model_conductor_daemon=info")]
    log_level: String,

    /// Seconds between metrics publications (0 disables)
    #[arg(long, default_value_t = 60)]
    metrics_interval_secs: u64,

    /// Write Prometheus text here instead of logging it
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Validate the config, print the effective values and exit
    #[arg(long)]
    check_config: bool,
}

fn resolve_config(args: &Args) -> anyhow::Result<ServingConfig> {
    match &args.config {
        Some(path) => {
            let mut config = load_config_from_path(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        None => {
            let (config, source) = load_config().context("loading default config")?;
            match source {
                ConfigSource::File(path) => info!(path = %path.display(), "Using config file"),
                ConfigSource::Defaults => info!("No config file found, using defaults"),
            }
            Ok(config)
        }
    }
}

async fn log_alerts(mut alerts: mpsc::Receiver<Alert>) {
    while let Some(alert) = alerts.recv().await {
        match alert.severity {
            Severity::Critical => error!(
                model = %alert.model_id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "Alert fired: {alert}"
            ),
            _ => warn!(
                model = %alert.model_id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = ?alert.severity,
                "Alert fired: {alert}"
            ),
        }
    }
    debug!("Alert channel closed");
}

async fn publish_metrics(registry: &ModelRegistry, target: Option<&PathBuf>) {
    let text = registry.to_prometheus();
    match target {
        Some(path) => {
            // Write then rename so scrapers never see a partial file
            let tmp = path.with_extension("prom.tmp");
            let result = async {
                tokio::fs::write(&tmp, text.as_bytes()).await?;
                tokio::fs::rename(&tmp, path).await
            }
            .await;
            if let Err(e) = result {
                warn!(error = %e, path = %path.display(), "Failed to write metrics file");
            }
        }
        None => info!(metrics = %text, "Metrics"),
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid --log-level '{}'", args.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = resolve_config(&args)?;

    if args.check_config {
        println!("{}", config_summary(&config));
        return Ok(());
    }

    info!(
        pid = std::process::id(),
        models = config.models.len(),
        rules = config.alert_rules.len(),
        strategy = %config.balancer.default_strategy,
        "Starting Model Conductor Daemon"
    );

    let (registry, alerts) =
        ModelRegistry::from_config(&config).context("building model registry")?;
    let registry = Arc::new(registry);

    let maintenance = spawn_maintenance(
        Arc::clone(registry.cache()),
        Arc::clone(registry.monitor()),
        &config,
    );
    tokio::spawn(log_alerts(alerts));

    let metrics_task = (args.metrics_interval_secs > 0).then(|| {
        let registry = Arc::clone(&registry);
        let target = args.metrics_file.clone();
        let period = Duration::from_secs(args.metrics_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                publish_metrics(&registry, target.as_ref()).await;
            }
        })
    });

    info!(tasks = ?maintenance.running(), "Ready");

    wait_for_shutdown().await;

    if let Some(task) = metrics_task {
        task.abort();
    }
    maintenance.shutdown();
    publish_metrics(&registry, args.metrics_file.as_ref()).await;

    let dropped = registry.monitor().dropped_alerts();
    if dropped > 0 {
        warn!(dropped, "Alerts were dropped during this run");
    }
    info!("Model Conductor Daemon stopped");
    Ok(())
}

fn config_summary(config: &ServingConfig) -> String {
    format!(
        "cache.capacity = {}\ncache.ttl_secs = {}\nbalancer.default_strategy = \"{}\"\nmonitor.staleness_secs = {}\nmodels = {}\nalert_rules = {}",
        config.cache.capacity,
        config.cache.ttl_secs,
        config.balancer.default_strategy,
        config.monitor.staleness_secs,
        config.models.len(),
        config.alert_rules.len(),
    )
}

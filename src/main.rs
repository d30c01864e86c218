//! icmpmon binary entry point.
//!
//! Wires the probing engine together and consumes its event stream as
//! structured log lines. Rendering fancier than that (tables, colors) is
//! left to downstream consumers of the library.

use std::sync::Arc;

use clap::Parser;
use icmpmon::{AppConfig, Classification, IcmpProber, ProbeScheduler, TargetConfig, TargetRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// icmpmon - ICMP latency monitor with rolling statistics and anomaly detection.
#[derive(Parser, Debug)]
#[command(name = "icmpmon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "icmpmon.yaml", env = "ICMPMON_CONFIG")]
    config: String,

    /// Probe interval (overrides config file)
    #[arg(long, env = "ICMPMON_INTERVAL")]
    interval: Option<humantime::Duration>,

    /// Per-probe timeout (overrides config file)
    #[arg(long, env = "ICMPMON_TIMEOUT")]
    timeout: Option<humantime::Duration>,

    /// Z-score anomaly threshold (overrides config file)
    #[arg(long, env = "ICMPMON_Z_THRESHOLD")]
    z_threshold: Option<f64>,

    /// Additional hosts to monitor, on top of the config file
    #[arg(long = "target", value_name = "HOST")]
    extra_targets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,icmpmon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_or_create(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file).
    if let Some(interval) = cli.interval {
        config.engine.interval = interval.into();
    }
    if let Some(timeout) = cli.timeout {
        config.engine.timeout = timeout.into();
    }
    if let Some(z) = cli.z_threshold {
        config.engine.z_threshold = z;
    }
    for host in &cli.extra_targets {
        config
            .targets
            .push(TargetConfig::new(host.clone(), host.clone()));
    }

    // Overrides can invalidate a previously valid file; check again.
    config.validate()?;

    tracing::info!(
        interval = %humantime::format_duration(config.engine.interval),
        timeout = %humantime::format_duration(config.engine.timeout),
        z_threshold = config.engine.z_threshold,
        targets = config.enabled_targets().count(),
        "Engine configured"
    );

    let registry = Arc::new(TargetRegistry::new(config.engine.clone()));
    let scheduler = ProbeScheduler::new(
        Arc::clone(&registry),
        Arc::new(IcmpProber::new()),
        config.engine.clone(),
    );

    let mut stream = scheduler.subscribe();
    for target in config.enabled_targets() {
        scheduler.add(target.clone()).await?;
    }

    // Event consumer: the stand-in for an external renderer.
    let consumer = tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            let rtt = event
                .sample
                .rtt_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms:.1}ms"));
            match event.classification {
                Classification::Anomalous => {
                    tracing::warn!(
                        target = %event.target_name,
                        host = %event.host,
                        rtt = %rtt,
                        availability = %event.availability,
                        mean_ms = event.snapshot.mean,
                        stddev_ms = event.snapshot.stddev,
                        success_rate = event.snapshot.success_rate,
                        "Anomalous probe"
                    );
                }
                _ => {
                    tracing::info!(
                        target = %event.target_name,
                        host = %event.host,
                        rtt = %rtt,
                        classification = %event.classification,
                        availability = %event.availability,
                        mean_ms = event.snapshot.mean,
                        success_rate = event.snapshot.success_rate,
                        "Probe"
                    );
                }
            }
        }
    });

    tracing::info!("Monitoring started, press Ctrl+C to stop");
    shutdown_signal().await;

    tracing::info!("Shutting down scheduler...");
    scheduler.shutdown().await;
    consumer.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}

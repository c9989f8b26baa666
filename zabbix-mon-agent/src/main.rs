//! Zabbix monitoring agent
//!
//! Samples host resources and pushes them to a Zabbix server:
//! - JSON-RPC control plane: login, host lookup, trapper item provisioning
//! - sender data plane: framed JSON batches over TCP on a fixed interval
//! - retries with exponential backoff and session refresh on auth expiry

mod catalog;
mod cli;
mod config;
mod logging;
mod metrics;
mod scheduler;
mod translator;
mod zabbix;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::Cli;
use config::AgentConfig;
use metrics::SystemCollector;
use scheduler::Scheduler;
use zabbix::{ZabbixApi, ZabbixSender};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::resolve(&cli).await.context("Failed to load configuration")?;

    if cli.print_config {
        print!("{}", config.redacted().to_toml()?);
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    logging::init(&config.logging.level, config.logging.format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.zabbix.url,
        host = %config.zabbix.host,
        interval_secs = config.collection.interval_secs,
        "Zabbix monitoring agent starting"
    );

    let api = ZabbixApi::new(
        &config.zabbix.url,
        config.zabbix.user.clone(),
        config.zabbix.password.clone(),
        config.http_timeout(),
        config.zabbix.trapper_port,
    )
    .context("Failed to create Zabbix API client")?;
    let sender = ZabbixSender::new(config.sender_timeout());
    let source = SystemCollector::new();

    let scheduler = Scheduler::start(source, api, sender, config.scheduler_config())
        .await
        .context("Failed to initialize Zabbix session")?;
    let scheduler = Arc::new(scheduler);

    let cancel = CancellationToken::new();
    let mut task = tokio::spawn({
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    let stopped_early = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut task => {
            result.context("Scheduler task failed")?;
            true
        }
    };

    if stopped_early {
        warn!("Scheduler stopped unexpectedly");
    } else {
        info!("Shutting down gracefully");
        cancel.cancel();
        task.await.context("Scheduler task failed")?;
    }

    info!(stats = ?scheduler.stats(), "Zabbix monitoring agent stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

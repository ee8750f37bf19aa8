//! `nodeboot`
//!
//! Bootstraps a relay node: serves the HTTP front, downloads and launches the
//! relay, agent and tunnel client, discovers the public hostname and writes
//! the subscription. Runs until Ctrl+C or SIGTERM, then stops its children.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use nodeboot::bootstrap;
use nodeboot::cli::Args;
use nodeboot::fetch::http_client;
use nodeboot_core::tracing_init::init_tracing;
use nodeboot_front::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    let settings = args.into_settings().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        work_dir = %settings.work_dir.root().display(),
        http_port = settings.http_port,
        relay_port = settings.relay_port,
        agent = settings.agent.is_some(),
        named_tunnel = settings.tunnel_domain.is_some(),
        "Starting nodeboot"
    );

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.http_port));
    let state = AppState {
        subscription_file: settings.work_dir.subscription(),
        share_dir: settings.share_dir.clone(),
        sub_path: settings.sub_path.clone(),
    };
    let mut front = tokio::spawn(nodeboot_front::serve(addr, state));

    let http = http_client().context("Failed to build HTTP client")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let node = tokio::select! {
        result = bootstrap::run(&settings, &http) => result.context("Bootstrap failed")?,
        signal = &mut shutdown => {
            info!(signal, "Shutdown requested during bootstrap");
            return Ok(());
        }
        result = &mut front => {
            return Err(front_exit(result));
        }
    };

    if let Some(hostname) = node.session().hostname.as_deref() {
        info!(
            hostname,
            links = node.subscription().raw_links().len(),
            "Node is up"
        );
    }

    // Notify systemd that startup is complete (unix only).
    // The `true` parameter unsets $NOTIFY_SOCKET so children don't inherit it.
    #[cfg(unix)]
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Failed to notify systemd");
    }

    let outcome = tokio::select! {
        signal = &mut shutdown => {
            info!(signal, "Received shutdown signal");
            Ok(())
        }
        result = &mut front => Err(front_exit(result)),
    };

    node.shutdown().await;
    info!("nodeboot stopped");
    outcome
}

/// Resolves with the name of the signal that asked us to stop.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}

/// The HTTP front only returns on failure.
fn front_exit(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    let err = match result {
        Ok(Ok(())) => anyhow::anyhow!("HTTP front stopped unexpectedly"),
        Ok(Err(e)) => anyhow::Error::new(e).context("HTTP front failed"),
        Err(e) => anyhow::Error::new(e).context("HTTP front task panicked"),
    };
    error!(error = %err, "HTTP front exited");
    err
}

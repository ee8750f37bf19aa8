//! Bootstrap sequence.
//!
//! 1. prepare the working directory and withdraw the previous run's nodes
//! 2. write relay, tunnel and agent configuration
//! 3. download the binaries for this architecture
//! 4. launch agent, relay and tunnel client
//! 5. learn the public hostname (configured, or discovered from the log)
//! 6. generate and write the subscription, then publish it
//! 7. schedule removal of files that are no longer needed

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nodeboot_core::agent::{AgentFlavor, AgentSettings, v1_config_yaml};
use nodeboot_core::artifacts::{self, BinaryNames};
use nodeboot_core::discovery::{DomainDiscovery, TunnelSession};
use nodeboot_core::links::{self, display_name};
use nodeboot_core::platform::Arch;
use nodeboot_core::relay_config::{self, RelayParams};
use nodeboot_core::tunnel::TunnelMode;
use nodeboot_core::{Settings, SubscriptionRecord};

use crate::cleanup;
use crate::fetch::{FetchError, Fetcher};
use crate::metadata::lookup_identity;
use crate::process::{DEFAULT_TERMINATE_TIMEOUT, ManagedProcess, wait_for_port};
use crate::tunnel::TunnelSupervisor;
use crate::upload::{Uploader, register_keepalive};

/// How long the relay gets to open its port.
pub const RELAY_READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Failures that abort the bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Core(#[from] nodeboot_core::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Children started by the bootstrap.
#[derive(Debug)]
struct Launched {
    children: Vec<ManagedProcess>,
    tunnel: TunnelSupervisor,
}

impl Launched {
    async fn shutdown(mut self) {
        self.tunnel.shutdown().await;
        for child in self.children.into_iter().rev() {
            child.terminate(DEFAULT_TERMINATE_TIMEOUT).await;
        }
    }
}

/// A bootstrapped node.
#[derive(Debug)]
pub struct Node {
    session: TunnelSession,
    record: SubscriptionRecord,
    launched: Launched,
    cleanup: Option<JoinHandle<()>>,
}

impl Node {
    pub const fn session(&self) -> &TunnelSession {
        &self.session
    }

    pub const fn subscription(&self) -> &SubscriptionRecord {
        &self.record
    }

    /// Terminate every owned child.
    pub async fn shutdown(self) {
        if let Some(cleanup) = self.cleanup {
            cleanup.abort();
        }
        self.launched.shutdown().await;
        info!("All child processes stopped");
    }
}

/// Run the whole sequence. On error every child started so far is stopped.
pub async fn run(settings: &Settings, http: &reqwest::Client) -> Result<Node, BootstrapError> {
    prepare_workdir(settings, http).await?;

    let mode = TunnelMode::classify(
        settings.tunnel_auth.as_deref(),
        settings.tunnel_domain.as_deref(),
    )?;
    write_configs(settings, &mode)?;

    let flavor = settings.agent.as_ref().map(AgentSettings::flavor);
    let names = if settings.download.randomize_names {
        BinaryNames::random(&mut rand::thread_rng())
    } else {
        BinaryNames::fixed(flavor)
    };
    let arch = Arch::current();
    let plan = artifacts::plan(&settings.download.base, arch, flavor, &names);
    info!(%arch, count = plan.len(), "Downloading binaries");
    let binaries = Fetcher::new(http.clone())
        .download_all(&plan, &settings.work_dir)
        .await?;

    let Launched { children, tunnel } = launch(settings, &mode, &names).await;
    let (tunnel, session) = resolve_hostname(settings, &mode, tunnel).await;
    let launched = Launched { children, tunnel };

    let outcome = match session {
        Ok(session) => publish(settings, http, &session)
            .await
            .map(|record| (session, record)),
        Err(e) => Err(e),
    };
    let (session, record) = match outcome {
        Ok(done) => done,
        Err(e) => {
            launched.shutdown().await;
            return Err(e.into());
        }
    };

    let cleanup = if settings.cleanup.keep_files {
        debug!("Keeping bootstrap files");
        None
    } else {
        Some(cleanup::schedule(
            settings.cleanup.delay,
            cleanup::targets(&settings.work_dir, &binaries),
        ))
    };

    Ok(Node {
        session,
        record,
        launched,
        cleanup,
    })
}

async fn prepare_workdir(settings: &Settings, http: &reqwest::Client) -> nodeboot_core::Result<()> {
    let work = &settings.work_dir;
    if work.ensure()? {
        info!(path = %work.root().display(), "Created working directory");
    }
    std::fs::create_dir_all(&settings.share_dir)?;

    if let Some(uploader) = Uploader::from_settings(http, &settings.upload) {
        uploader.withdraw_previous(&work.subscription()).await;
    }
    work.remove_stale();
    Ok(())
}

fn write_configs(settings: &Settings, mode: &TunnelMode) -> nodeboot_core::Result<()> {
    let work = &settings.work_dir;
    relay_config::build(&RelayParams {
        uuid: &settings.uuid,
        relay_port: settings.relay_port,
        http_port: settings.http_port,
        download_fallbacks: &settings.download.fallbacks,
    })
    .write(&work.relay_config())?;
    debug!(path = %work.relay_config().display(), "Wrote relay configuration");

    mode.prepare(work, settings.relay_port)?;

    if let Some(agent) = settings.agent.as_ref().filter(|a| a.flavor() == AgentFlavor::V1) {
        std::fs::write(work.agent_config(), v1_config_yaml(agent, &settings.uuid))?;
        debug!(path = %work.agent_config().display(), "Wrote agent configuration");
    }
    Ok(())
}

/// Start the agent (if configured), the relay and the tunnel client. Launch
/// failures are logged; a missing tunnel surfaces later through discovery.
async fn launch(settings: &Settings, mode: &TunnelMode, names: &BinaryNames) -> Launched {
    let work = &settings.work_dir;
    let mut children = Vec::new();

    match &settings.agent {
        Some(agent) => {
            let args = agent.launch_args(&work.agent_config());
            match ManagedProcess::spawn("agent", &work.binary(&names.agent), &args) {
                Ok(process) => children.push(process),
                Err(e) => warn!(error = %e, "Monitoring agent failed to start"),
            }
        }
        None => info!("Monitoring agent not configured, skipping"),
    }

    let relay_args = relay_config::launch_args(&work.relay_config());
    match ManagedProcess::spawn("relay", &work.binary(&names.relay), &relay_args) {
        Ok(process) => {
            children.push(process);
            match wait_for_port(settings.relay_port, RELAY_READY_TIMEOUT, READY_POLL_INTERVAL).await {
                Ok(()) => info!(port = settings.relay_port, "Relay is ready"),
                Err(e) => warn!(error = %e, "Relay readiness check failed"),
            }
        }
        Err(e) => warn!(error = %e, "Relay failed to start"),
    }

    let mut tunnel = TunnelSupervisor::new(
        work.binary(&names.tunnel),
        mode.launch_args(work, settings.relay_port),
        DEFAULT_TERMINATE_TIMEOUT,
    );
    if let Err(e) = tunnel.launch() {
        warn!(error = %e, "Tunnel client failed to start");
    }

    Launched { children, tunnel }
}

/// Named tunnels have a configured hostname; quick tunnels are scraped.
async fn resolve_hostname(
    settings: &Settings,
    mode: &TunnelMode,
    tunnel: TunnelSupervisor,
) -> (TunnelSupervisor, nodeboot_core::Result<TunnelSession>) {
    if let Some(domain) = mode.fixed_domain() {
        info!(hostname = domain, "Using configured tunnel domain");
        return (tunnel, Ok(TunnelSession::fixed(domain)));
    }

    let mut discovery = DomainDiscovery::new(
        settings.work_dir.boot_log(),
        settings.discovery.clone(),
        tunnel,
    );
    let result = discovery.run().await;
    (discovery.into_control(), result)
}

/// Generate the links for `session`, write `sub.txt` and run the publish hooks.
async fn publish(
    settings: &Settings,
    http: &reqwest::Client,
    session: &TunnelSession,
) -> nodeboot_core::Result<SubscriptionRecord> {
    let hostname = session
        .hostname
        .as_deref()
        .ok_or(nodeboot_core::Error::DiscoveryFailed {
            attempts: session.retry_count,
        })?;

    let identity = lookup_identity(http, &settings.metadata_url).await;
    let name = display_name(settings.name.as_deref(), &identity);
    let record = links::generate(&settings.link_template(), hostname, &name);

    let path = settings.work_dir.subscription();
    record.write(&path)?;
    info!(path = %path.display(), hostname, name = %name, "Subscription written");
    debug!(document = %record.document(), "Generated links");

    if let Some(uploader) = Uploader::from_settings(http, &settings.upload) {
        uploader
            .publish(settings.subscription_url().as_deref(), &record)
            .await;
    }
    register_keepalive(http, &settings.upload).await;

    Ok(record)
}


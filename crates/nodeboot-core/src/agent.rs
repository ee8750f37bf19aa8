//! Monitoring agent configuration.
//!
//! Two agent generations are supported. The newer one (v1) reads a YAML file
//! and takes `host:port` as a single server value; the older one (v0) is
//! configured entirely through flags and needs a separate port.

use std::path::Path;

/// Ports on which the agent server is assumed to terminate TLS.
pub const TLS_PORTS: &[u16] = &[443, 8443, 2096, 2087, 2083, 2053];

/// Agent generation, decided by whether a separate port was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentFlavor {
    V0,
    V1,
}

/// Connection settings for the monitoring agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// `host` for v0, `host:port` for v1.
    pub server: String,
    /// Only set for v0.
    pub port: Option<u16>,
    /// Client secret (v1) or agent key (v0).
    pub key: String,
}

impl AgentSettings {
    /// Build settings when both server and key are present.
    pub fn from_parts(server: Option<&str>, port: Option<u16>, key: Option<&str>) -> Option<Self> {
        let server = server.map(str::trim).filter(|s| !s.is_empty())?;
        let key = key.map(str::trim).filter(|k| !k.is_empty())?;
        Some(Self {
            server: server.to_string(),
            port,
            key: key.to_string(),
        })
    }

    pub const fn flavor(&self) -> AgentFlavor {
        if self.port.is_some() {
            AgentFlavor::V0
        } else {
            AgentFlavor::V1
        }
    }

    /// Whether the server port is one of [`TLS_PORTS`].
    pub fn uses_tls(&self) -> bool {
        let port = self.port.or_else(|| {
            self.server
                .rsplit_once(':')
                .and_then(|(_, p)| p.parse::<u16>().ok())
        });
        port.is_some_and(|p| TLS_PORTS.contains(&p))
    }

    /// Arguments for launching the agent binary.
    pub fn launch_args(&self, config_yaml: &Path) -> Vec<String> {
        match self.port {
            None => vec!["-c".to_string(), config_yaml.display().to_string()],
            Some(port) => {
                let mut args = vec![
                    "-s".to_string(),
                    format!("{}:{port}", self.server),
                    "-p".to_string(),
                    self.key.clone(),
                ];
                if self.uses_tls() {
                    args.push("--tls".to_string());
                }
                args.extend(
                    [
                        "--disable-auto-update",
                        "--report-delay",
                        "4",
                        "--skip-conn",
                        "--skip-procs",
                    ]
                    .map(String::from),
                );
                args
            }
        }
    }
}

/// Render the v1 agent `config.yaml`.
pub fn v1_config_yaml(agent: &AgentSettings, uuid: &str) -> String {
    format!(
        r"client_secret: {key}
debug: false
disable_auto_update: true
disable_command_execute: false
disable_force_update: true
disable_nat: false
disable_send_query: false
gpu: false
insecure_tls: true
ip_report_period: 1800
report_delay: 4
server: {server}
skip_connection_count: true
skip_procs_count: true
temperature: false
tls: {tls}
use_gitee_to_upgrade: false
use_ipv6_country_code: false
uuid: {uuid}
",
        key = agent.key,
        server = agent.server,
        tls = agent.uses_tls(),
    )
}

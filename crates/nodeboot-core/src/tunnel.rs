//! Tunnel client launch modes.
//!
//! A named tunnel is used when both a domain and credentials are configured;
//! the credentials are either a connector token or a credentials JSON blob.
//! Otherwise an anonymous quick tunnel is started and its hostname has to be
//! discovered from the log file.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::workdir::WorkDir;

#[allow(clippy::unwrap_used)] // literal pattern
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9=]{120,250}$").unwrap()
});

/// How the tunnel client is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelMode {
    /// Named tunnel authenticated with a connector token.
    Token { token: String, domain: String },
    /// Named tunnel authenticated with a credentials file.
    Credentials {
        json: String,
        tunnel_id: String,
        domain: String,
    },
    /// Anonymous tunnel; the hostname is announced in the log.
    Quick,
}

impl TunnelMode {
    /// Pick the mode from the configured auth blob and domain.
    pub fn classify(auth: Option<&str>, domain: Option<&str>) -> Result<Self> {
        let auth = auth.map(str::trim).filter(|s| !s.is_empty());
        let domain = domain.map(str::trim).filter(|s| !s.is_empty());

        let (auth, domain) = match (auth, domain) {
            (Some(auth), Some(domain)) => (auth, domain.to_string()),
            (None, None) => {
                info!("Tunnel domain or auth is empty, using a quick tunnel");
                return Ok(Self::Quick);
            }
            _ => {
                warn!("Only one of tunnel domain and tunnel auth is set, using a quick tunnel");
                return Ok(Self::Quick);
            }
        };

        if TOKEN_RE.is_match(auth) {
            return Ok(Self::Token {
                token: auth.to_string(),
                domain,
            });
        }
        if auth.contains("TunnelSecret") {
            let tunnel_id = tunnel_id(auth)?;
            return Ok(Self::Credentials {
                json: auth.to_string(),
                tunnel_id,
                domain,
            });
        }
        Err(Error::Tunnel(
            "tunnel auth is neither a connector token nor a credentials JSON".into(),
        ))
    }

    /// The hostname is known up front for named tunnels.
    pub fn fixed_domain(&self) -> Option<&str> {
        match self {
            Self::Token { domain, .. } | Self::Credentials { domain, .. } => Some(domain),
            Self::Quick => None,
        }
    }

    /// Write the files this mode needs before launch.
    pub fn prepare(&self, work: &WorkDir, relay_port: u16) -> Result<()> {
        if let Self::Credentials {
            json,
            tunnel_id,
            domain,
        } = self
        {
            let credentials = work.tunnel_credentials();
            std::fs::write(&credentials, json)?;
            std::fs::write(
                work.tunnel_config(),
                credentials_yaml(tunnel_id, &credentials, domain, relay_port),
            )?;
        }
        Ok(())
    }

    /// Arguments for the tunnel client binary.
    pub fn launch_args(&self, work: &WorkDir, relay_port: u16) -> Vec<String> {
        match self {
            Self::Token { token, .. } => [
                "tunnel",
                "--edge-ip-version",
                "auto",
                "--no-autoupdate",
                "--protocol",
                "http2",
                "run",
                "--token",
                token,
            ]
            .map(String::from)
            .to_vec(),
            Self::Credentials { .. } => vec![
                "tunnel".to_string(),
                "--edge-ip-version".to_string(),
                "auto".to_string(),
                "--config".to_string(),
                work.tunnel_config().display().to_string(),
                "run".to_string(),
            ],
            Self::Quick => quick_tunnel_args(&work.boot_log(), relay_port),
        }
    }
}

/// Quick tunnel arguments; the assigned hostname ends up in `log_file`.
pub fn quick_tunnel_args(log_file: &Path, relay_port: u16) -> Vec<String> {
    vec![
        "tunnel".to_string(),
        "--edge-ip-version".to_string(),
        "auto".to_string(),
        "--no-autoupdate".to_string(),
        "--protocol".to_string(),
        "http2".to_string(),
        "--logfile".to_string(),
        log_file.display().to_string(),
        "--loglevel".to_string(),
        "info".to_string(),
        "--url".to_string(),
        format!("http://localhost:{relay_port}"),
    ]
}

fn tunnel_id(credentials: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(credentials)
        .map_err(|e| Error::Tunnel(format!("credentials JSON is malformed: {e}")))?;
    value
        .get("TunnelID")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Tunnel("credentials JSON has no TunnelID".into()))
}

/// Render `tunnel.yml` for a credentials-file tunnel.
pub fn credentials_yaml(tunnel_id: &str, credentials: &Path, domain: &str, relay_port: u16) -> String {
    format!(
        r"tunnel: {tunnel_id}
credentials-file: {credentials}
protocol: http2

ingress:
  - hostname: {domain}
    service: http://localhost:{relay_port}
    originRequest:
      noTLSVerify: true
  - service: http_status:404
",
        credentials = credentials.display(),
    )
}

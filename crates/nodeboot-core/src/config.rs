//! Runtime settings.
//!
//! Built once at startup from CLI flags and environment variables and passed
//! by reference to every component.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::agent::AgentSettings;
use crate::error::{Error, Result};
use crate::links::LinkTemplate;
use crate::relay_config::{TROJAN_WS_PORT, VLESS_TCP_PORT};
use crate::retry::RetryPolicy;
use crate::workdir::WorkDir;

pub const DEFAULT_KEEPALIVE_URL: &str = "https://keep.gvrander.eu.org/add-url";

/// Route names the HTTP front owns; the subscription path may not shadow them.
const RESERVED_PATHS: &[&str] = &["list", "download"];

/// Edge endpoint advertised in generated links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSettings {
    pub addr: String,
    pub port: u16,
}

/// Optional publishing of nodes to an aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSettings {
    pub upload_url: Option<String>,
    /// Public URL of this deployment.
    pub project_url: Option<String>,
    /// Register `project_url` with the keepalive service.
    pub auto_access: bool,
    pub keepalive_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Mirror base, `{arch}` is substituted.
    pub base: String,
    pub randomize_names: bool,
    /// Files reachable as `/download/<name>` through the relay port.
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Delay after discovery before binaries and logs are removed.
    pub delay: Duration,
    pub keep_files: bool,
}

/// Complete bootstrap configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub work_dir: WorkDir,
    /// Directory served by the file download routes.
    pub share_dir: PathBuf,
    pub uuid: String,
    pub http_port: u16,
    pub relay_port: u16,
    pub sub_path: String,
    /// Operator label prefixed to node names.
    pub name: Option<String>,
    pub edge: EdgeSettings,
    pub agent: Option<AgentSettings>,
    pub tunnel_auth: Option<String>,
    pub tunnel_domain: Option<String>,
    pub upload: UploadSettings,
    pub download: DownloadSettings,
    pub metadata_url: String,
    pub discovery: RetryPolicy,
    pub cleanup: CleanupSettings,
}

/// Unreserved URL characters; anything else could be read as route syntax.
const fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-')
}

impl Settings {
    /// Validate the configuration. Returns an error on invalid values.
    pub fn validate(&self) -> Result<()> {
        uuid::Uuid::parse_str(&self.uuid)
            .map_err(|e| Error::Config(format!("identifier {:?} is not a UUID: {e}", self.uuid)))?;

        if self.sub_path.is_empty() || self.sub_path.contains('/') {
            return Err(Error::Config(format!(
                "subscription path {:?} must be a single non-empty segment",
                self.sub_path
            )));
        }
        if !self.sub_path.chars().all(is_path_char) {
            return Err(Error::Config(format!(
                "subscription path {:?} may only contain letters, digits and `._~-`",
                self.sub_path
            )));
        }
        if RESERVED_PATHS.contains(&self.sub_path.as_str()) {
            return Err(Error::Config(format!(
                "subscription path {:?} collides with a built-in route",
                self.sub_path
            )));
        }
        if self.http_port == self.relay_port {
            return Err(Error::Config(format!(
                "HTTP port and relay port must differ (both {})",
                self.http_port
            )));
        }
        for port in [self.http_port, self.relay_port] {
            if (VLESS_TCP_PORT..=TROJAN_WS_PORT).contains(&port) {
                return Err(Error::Config(format!(
                    "port {port} is reserved for the relay's internal inbounds"
                )));
            }
        }
        if self.discovery.max_attempts == 0 {
            return Err(Error::Config(
                "discovery needs at least one restart attempt".into(),
            ));
        }
        if let Some(name) = self
            .download
            .fallbacks
            .iter()
            .find(|n| n.is_empty() || n.contains('/'))
        {
            return Err(Error::Config(format!(
                "download fallback {name:?} must be a plain file name"
            )));
        }
        Ok(())
    }

    pub fn link_template(&self) -> LinkTemplate<'_> {
        LinkTemplate {
            uuid: &self.uuid,
            edge_addr: &self.edge.addr,
            edge_port: self.edge.port,
        }
    }

    /// Public subscription URL, when the project URL is known.
    pub fn subscription_url(&self) -> Option<String> {
        self.upload
            .project_url
            .as_deref()
            .map(|url| format!("{}/{}", url.trim_end_matches('/'), self.sub_path))
    }
}

/// Pick the client identifier: configured value, else the one persisted in
/// the working directory, else a fresh v4 UUID that is persisted for next time.
pub fn resolve_identifier(configured: Option<&str>, work: &WorkDir) -> Result<String> {
    if let Some(id) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }

    let path = work.identifier();
    match std::fs::read_to_string(&path) {
        Ok(stored) if !stored.trim().is_empty() => {
            info!(path = %path.display(), "Using persisted identifier");
            return Ok(stored.trim().to_string());
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    info!(path = %path.display(), "Generated and persisted a new identifier");
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::artifacts::DEFAULT_DOWNLOAD_BASE;
    use crate::links::{DEFAULT_EDGE_ADDR, DEFAULT_EDGE_PORT, DEFAULT_METADATA_URL};

    fn settings() -> Settings {
        Settings {
            work_dir: WorkDir::new("./tmp"),
            share_dir: PathBuf::from("./share"),
            uuid: "c78a721e-2d80-468d-94ab-4bfd04e1b023".to_string(),
            http_port: 3000,
            relay_port: 8001,
            sub_path: "sub".to_string(),
            name: None,
            edge: EdgeSettings {
                addr: DEFAULT_EDGE_ADDR.to_string(),
                port: DEFAULT_EDGE_PORT,
            },
            agent: None,
            tunnel_auth: None,
            tunnel_domain: None,
            upload: UploadSettings {
                keepalive_url: DEFAULT_KEEPALIVE_URL.to_string(),
                ..UploadSettings::default()
            },
            download: DownloadSettings {
                base: DEFAULT_DOWNLOAD_BASE.to_string(),
                randomize_names: false,
                fallbacks: Vec::new(),
            },
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            discovery: RetryPolicy::default(),
            cleanup: CleanupSettings {
                delay: Duration::from_secs(90),
                keep_files: false,
            },
        }
    }

    #[test]
    fn defaults_are_valid() {
        settings().validate().unwrap();
    }

    #[test]
    fn rejects_bad_identifier() {
        let mut s = settings();
        s.uuid = "not-a-uuid".into();
        assert!(matches!(s.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_nested_or_reserved_sub_path() {
        let mut s = settings();
        s.sub_path = "a/b".into();
        assert!(s.validate().is_err());
        s.sub_path = "list".into();
        assert!(s.validate().is_err());
        s.sub_path = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_route_syntax_in_sub_path() {
        let mut s = settings();
        for bad in ["{token}", "*rest", "sub path", "a:b", "%2F"] {
            s.sub_path = bad.into();
            assert!(matches!(s.validate(), Err(Error::Config(_))), "{bad}");
        }
        for good in ["sub", "my-sub_v2.txt", "a~b"] {
            s.sub_path = good.into();
            assert!(s.validate().is_ok(), "{good}");
        }
    }

    #[test]
    fn rejects_port_clashes() {
        let mut s = settings();
        s.relay_port = 3000;
        assert!(s.validate().is_err());
        s.relay_port = 3003;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut s = settings();
        s.discovery.max_attempts = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn subscription_url_joins_project_and_path() {
        let mut s = settings();
        assert!(s.subscription_url().is_none());
        s.upload.project_url = Some("https://app.example.com/".into());
        assert_eq!(s.subscription_url().unwrap(), "https://app.example.com/sub");
    }

    #[test]
    fn configured_identifier_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path());
        let id = resolve_identifier(Some(" abc "), &work).unwrap();
        assert_eq!(id, "abc");
        assert!(!work.identifier().exists());
    }

    #[test]
    fn generated_identifier_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path());
        let first = resolve_identifier(None, &work).unwrap();
        uuid::Uuid::parse_str(&first).unwrap();
        let second = resolve_identifier(Some(""), &work).unwrap();
        assert_eq!(first, second);
    }
}

//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use nodeboot_core::agent::AgentSettings;
use nodeboot_core::artifacts::DEFAULT_DOWNLOAD_BASE;
use nodeboot_core::config::{
    CleanupSettings, DEFAULT_KEEPALIVE_URL, DownloadSettings, EdgeSettings, UploadSettings,
    resolve_identifier,
};
use nodeboot_core::links::{DEFAULT_EDGE_ADDR, DEFAULT_EDGE_PORT, DEFAULT_METADATA_URL};
use nodeboot_core::{Error, Result, RetryPolicy, Settings, WorkDir};

/// HTTP front port when neither `SERVER_PORT` nor `PORT` is set.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

#[derive(Parser, Debug)]
#[command(name = "nodeboot")]
#[command(version, about = "Bootstrap a relay node behind a tunnel")]
pub struct Args {
    /// Client identifier; persisted in the working directory when omitted
    #[arg(long, env = "UUID")]
    pub uuid: Option<String>,

    /// Monitoring server (`host:port` for v1, `host` for v0)
    #[arg(long, env = "NEZHA_SERVER")]
    pub nezha_server: Option<String>,

    /// Monitoring server port; selects the v0 agent when set
    #[arg(long, env = "NEZHA_PORT")]
    pub nezha_port: Option<String>,

    /// Monitoring client secret (v1) or agent key (v0)
    #[arg(long, env = "NEZHA_KEY")]
    pub nezha_key: Option<String>,

    /// Fixed tunnel hostname; needs `--argo-auth`
    #[arg(long, env = "ARGO_DOMAIN")]
    pub argo_domain: Option<String>,

    /// Tunnel connector token or credentials JSON
    #[arg(long, env = "ARGO_AUTH")]
    pub argo_auth: Option<String>,

    /// Local port of the relay's public inbound
    #[arg(long, default_value_t = 8001, env = "ARGO_PORT")]
    pub argo_port: u16,

    /// HTTP front port
    #[arg(long, env = "SERVER_PORT")]
    pub server_port: Option<u16>,

    /// Platform-assigned port, used when `SERVER_PORT` is unset
    #[arg(long, env = "PORT", hide = true)]
    pub port: Option<u16>,

    /// Working directory for binaries, configs and the subscription
    #[arg(long, default_value = "./tmp", env = "FILE_PATH")]
    pub file_path: PathBuf,

    /// Directory served by the download routes
    #[arg(long, default_value = "./share", env = "SHARE_PATH")]
    pub share_path: PathBuf,

    /// Path segment serving the subscription
    #[arg(long, default_value = "sub", env = "SUB_PATH")]
    pub sub_path: String,

    /// Label prefixed to node names
    #[arg(long, env = "NAME")]
    pub name: Option<String>,

    /// Edge address advertised in links
    #[arg(long, default_value = DEFAULT_EDGE_ADDR, env = "CFIP")]
    pub cfip: String,

    /// Edge port advertised in links
    #[arg(long, default_value_t = DEFAULT_EDGE_PORT, env = "CFPORT")]
    pub cfport: u16,

    /// Aggregator base URL for node publishing
    #[arg(long, env = "UPLOAD_URL")]
    pub upload_url: Option<String>,

    /// Public URL of this deployment
    #[arg(long, env = "PROJECT_URL")]
    pub project_url: Option<String>,

    /// Register the project URL with the keepalive service
    #[arg(long, env = "AUTO_ACCESS")]
    pub auto_access: bool,

    /// Keepalive registration endpoint
    #[arg(long, default_value = DEFAULT_KEEPALIVE_URL, env = "KEEPALIVE_URL")]
    pub keepalive_url: String,

    /// Binary mirror; `{arch}` becomes `amd64` or `arm64`
    #[arg(long, default_value = DEFAULT_DOWNLOAD_BASE, env = "DOWNLOAD_BASE")]
    pub download_base: String,

    /// Network metadata endpoint used for node names
    #[arg(long, default_value = DEFAULT_METADATA_URL, env = "METADATA_URL")]
    pub metadata_url: String,

    /// Store binaries under random six-letter names
    #[arg(long, env = "RANDOM_NAMES")]
    pub random_names: bool,

    /// Share files reachable through the relay as `/download/<name>`
    #[arg(long, env = "DOWNLOAD_FALLBACKS", value_delimiter = ',')]
    pub download_fallbacks: Vec<String>,

    /// Tunnel restarts before hostname discovery gives up
    #[arg(long, default_value_t = 5, env = "DISCOVERY_MAX_ATTEMPTS")]
    pub discovery_max_attempts: u32,

    /// Seconds after startup before bootstrap files are removed
    #[arg(long, default_value_t = 90, env = "CLEANUP_DELAY")]
    pub cleanup_delay: u64,

    /// Never remove bootstrap files
    #[arg(long, env = "KEEP_FILES")]
    pub keep_files: bool,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// `SERVER_PORT` wins over `PORT`.
pub fn resolve_http_port(server_port: Option<u16>, port: Option<u16>) -> u16 {
    server_port.or(port).unwrap_or(DEFAULT_HTTP_PORT)
}

/// An empty value means "not set".
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_agent_port(value: Option<&str>) -> Result<Option<u16>> {
    value
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| Error::Config(format!("agent port {p:?} is invalid: {e}")))
        })
        .transpose()
}

impl Args {
    /// Build validated settings. Creates the working directory so the
    /// identifier can be persisted.
    pub fn into_settings(self) -> Result<Settings> {
        let work_dir = WorkDir::new(&self.file_path);
        if work_dir.ensure()? {
            info!(path = %work_dir.root().display(), "Created working directory");
        }
        let uuid = resolve_identifier(self.uuid.as_deref(), &work_dir)?;

        let nezha_port = non_empty(self.nezha_port);
        let agent = AgentSettings::from_parts(
            self.nezha_server.as_deref(),
            parse_agent_port(nezha_port.as_deref())?,
            self.nezha_key.as_deref(),
        );

        let settings = Settings {
            work_dir,
            share_dir: self.share_path,
            uuid,
            http_port: resolve_http_port(self.server_port, self.port),
            relay_port: self.argo_port,
            sub_path: self.sub_path.trim_matches('/').to_string(),
            name: non_empty(self.name),
            edge: EdgeSettings {
                addr: self.cfip,
                port: self.cfport,
            },
            agent,
            tunnel_auth: non_empty(self.argo_auth),
            tunnel_domain: non_empty(self.argo_domain),
            upload: UploadSettings {
                upload_url: non_empty(self.upload_url),
                project_url: non_empty(self.project_url),
                auto_access: self.auto_access,
                keepalive_url: self.keepalive_url,
            },
            download: DownloadSettings {
                base: self.download_base,
                randomize_names: self.random_names,
                fallbacks: self
                    .download_fallbacks
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            },
            metadata_url: self.metadata_url,
            discovery: RetryPolicy {
                max_attempts: self.discovery_max_attempts,
                ..RetryPolicy::default()
            },
            cleanup: CleanupSettings {
                delay: Duration::from_secs(self.cleanup_delay),
                keep_files: self.keep_files,
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const UUID: &str = "c78a721e-2d80-468d-94ab-4bfd04e1b023";

    fn parse(extra: &[&str], work: &std::path::Path) -> Args {
        let work = work.display().to_string();
        let mut argv = vec!["nodeboot", "--file-path", work.as_str(), "--uuid", UUID];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn server_port_wins_over_port() {
        assert_eq!(resolve_http_port(Some(8080), Some(9000)), 8080);
        assert_eq!(resolve_http_port(None, Some(9000)), 9000);
        assert_eq!(resolve_http_port(None, None), DEFAULT_HTTP_PORT);
    }

    #[test]
    fn builds_settings_from_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        let settings = parse(
            &[
                "--server-port",
                "3100",
                "--argo-port",
                "8101",
                "--argo-domain",
                " node.example.com ",
                "--download-fallbacks",
                "a.txt, b.bin,",
                "--discovery-max-attempts",
                "2",
            ],
            &work,
        )
        .into_settings()
        .unwrap();

        assert!(work.is_dir());
        assert_eq!(settings.uuid, UUID);
        assert_eq!(settings.http_port, 3100);
        assert_eq!(settings.relay_port, 8101);
        assert_eq!(settings.tunnel_domain.as_deref(), Some("node.example.com"));
        assert_eq!(settings.download.fallbacks, vec!["a.txt", "b.bin"]);
        assert_eq!(settings.discovery.max_attempts, 2);
        assert!(settings.agent.is_none());
    }

    #[test]
    fn agent_flavor_follows_port() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = parse(
            &[
                "--nezha-server",
                "mon.example.com",
                "--nezha-port",
                "5555",
                "--nezha-key",
                "k",
            ],
            tmp.path(),
        )
        .into_settings()
        .unwrap();
        assert_eq!(settings.agent.unwrap().port, Some(5555));
    }

    #[test]
    fn invalid_agent_port_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = parse(&["--nezha-port", "high"], tmp.path())
            .into_settings()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = parse(&["--server-port", "3100", "--argo-port", "3100"], tmp.path())
            .into_settings()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn route_syntax_sub_path_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = parse(&["--sub-path", "{token}"], tmp.path())
            .into_settings()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

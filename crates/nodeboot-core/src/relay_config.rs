//! Relay configuration emitter.
//!
//! The relay exposes one public inbound on the relay port. Anything that is
//! not a plain vless handshake falls back by request path to one of the
//! loopback inbounds below, or to the HTTP front for file downloads.

use std::path::Path;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Result;

pub const VLESS_TCP_PORT: u16 = 3001;
pub const VLESS_WS_PORT: u16 = 3002;
pub const VMESS_WS_PORT: u16 = 3003;
pub const TROJAN_WS_PORT: u16 = 3004;

pub const VLESS_WS_PATH: &str = "/vless-argo";
pub const VMESS_WS_PATH: &str = "/vmess-argo";
pub const TROJAN_WS_PATH: &str = "/trojan-argo";

const LOOPBACK: &str = "127.0.0.1";
const DOH_SERVER: &str = "https+local://8.8.8.8/dns-query";

/// Inputs of the emitter.
#[derive(Debug, Clone)]
pub struct RelayParams<'a> {
    pub uuid: &'a str,
    /// Public inbound port, also the tunnel's origin.
    pub relay_port: u16,
    /// Port of the HTTP front, target of download fallbacks.
    pub http_port: u16,
    /// File names reachable as `/download/<name>` through the relay port.
    pub download_fallbacks: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayConfig {
    pub log: LogSection,
    pub inbounds: Vec<Inbound>,
    pub dns: DnsSection,
    pub outbounds: Vec<Outbound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSection {
    pub access: String,
    pub error: String,
    pub loglevel: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub protocol: String,
    pub settings: Value,
    pub stream_settings: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Sniffing>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<String>,
    pub metadata_only: bool,
}

impl Default for Sniffing {
    fn default() -> Self {
        Self {
            enabled: true,
            dest_override: ["http", "tls", "quic"].map(String::from).to_vec(),
            metadata_only: false,
        }
    }
}

/// Path-based routing rule of the public inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fallback {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub dest: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsSection {
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outbound {
    pub protocol: String,
    pub tag: String,
}

impl RelayConfig {
    /// Serialize pretty-printed to `path`, replacing any previous file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Arguments for launching the relay binary against `config`.
pub fn launch_args(config: &Path) -> Vec<String> {
    vec!["-c".to_string(), config.display().to_string()]
}

/// Fallbacks of the public inbound, in match order.
pub fn fallbacks(params: &RelayParams<'_>) -> Vec<Fallback> {
    let mut rules = vec![
        Fallback {
            path: None,
            dest: VLESS_TCP_PORT,
        },
        Fallback {
            path: Some(VLESS_WS_PATH.to_string()),
            dest: VLESS_WS_PORT,
        },
        Fallback {
            path: Some(VMESS_WS_PATH.to_string()),
            dest: VMESS_WS_PORT,
        },
        Fallback {
            path: Some(TROJAN_WS_PATH.to_string()),
            dest: TROJAN_WS_PORT,
        },
    ];
    rules.extend(params.download_fallbacks.iter().map(|name| Fallback {
        path: Some(format!("/download/{name}")),
        dest: params.http_port,
    }));
    rules
}

fn ws_stream(path: &str) -> Value {
    json!({ "network": "ws", "security": "none", "wsSettings": { "path": path } })
}

/// Build the full relay configuration.
pub fn build(params: &RelayParams<'_>) -> RelayConfig {
    let uuid = params.uuid;
    let inbounds = vec![
        Inbound {
            port: params.relay_port,
            listen: None,
            protocol: "vless".to_string(),
            settings: json!({
                "clients": [{ "id": uuid, "flow": "xtls-rprx-vision" }],
                "decryption": "none",
                "fallbacks": fallbacks(params),
            }),
            stream_settings: json!({ "network": "tcp" }),
            sniffing: None,
        },
        Inbound {
            port: VLESS_TCP_PORT,
            listen: Some(LOOPBACK.to_string()),
            protocol: "vless".to_string(),
            settings: json!({ "clients": [{ "id": uuid }], "decryption": "none" }),
            stream_settings: json!({ "network": "tcp", "security": "none" }),
            sniffing: None,
        },
        Inbound {
            port: VLESS_WS_PORT,
            listen: Some(LOOPBACK.to_string()),
            protocol: "vless".to_string(),
            settings: json!({ "clients": [{ "id": uuid, "level": 0 }], "decryption": "none" }),
            stream_settings: ws_stream(VLESS_WS_PATH),
            sniffing: Some(Sniffing::default()),
        },
        Inbound {
            port: VMESS_WS_PORT,
            listen: Some(LOOPBACK.to_string()),
            protocol: "vmess".to_string(),
            settings: json!({ "clients": [{ "id": uuid, "alterId": 0 }] }),
            stream_settings: json!({ "network": "ws", "wsSettings": { "path": VMESS_WS_PATH } }),
            sniffing: Some(Sniffing::default()),
        },
        Inbound {
            port: TROJAN_WS_PORT,
            listen: Some(LOOPBACK.to_string()),
            protocol: "trojan".to_string(),
            settings: json!({ "clients": [{ "password": uuid }] }),
            stream_settings: ws_stream(TROJAN_WS_PATH),
            sniffing: Some(Sniffing::default()),
        },
    ];

    RelayConfig {
        log: LogSection {
            access: "/dev/null".to_string(),
            error: "/dev/null".to_string(),
            loglevel: "none".to_string(),
        },
        inbounds,
        dns: DnsSection {
            servers: vec![DOH_SERVER.to_string()],
        },
        outbounds: vec![
            Outbound {
                protocol: "freedom".to_string(),
                tag: "direct".to_string(),
            },
            Outbound {
                protocol: "blackhole".to_string(),
                tag: "block".to_string(),
            },
        ],
    }
}

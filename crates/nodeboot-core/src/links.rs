//! Link generator.
//!
//! Renders one vless, one vmess and one trojan link that reach the relay
//! through the edge address, with the tunnel hostname as TLS server name and
//! websocket host. The vmess link is itself base64 of a JSON record; client
//! apps expect it that way inside the (again base64) subscription document.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::relay_config::{TROJAN_WS_PATH, VLESS_WS_PATH, VMESS_WS_PATH};
use crate::subscription::SubscriptionRecord;

/// Identity used when the metadata lookup fails.
pub const DEFAULT_IDENTITY: &str = "Cloudflare";
pub const DEFAULT_METADATA_URL: &str = "https://speed.cloudflare.com/meta";
pub const DEFAULT_EDGE_ADDR: &str = "cdns.doon.eu.org";
pub const DEFAULT_EDGE_PORT: u16 = 443;

/// Early-data hint appended to every websocket path.
const EARLY_DATA: &str = "?ed=2560";
const FINGERPRINT: &str = "firefox";

/// Characters escaped in the `#name` fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`');

/// Subset of the network metadata endpoint's response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMeta {
    pub asn: serde_json::Value,
    pub as_organization: String,
}

impl NetworkMeta {
    /// `"<asn>-<organization>"` with spaces replaced by underscores.
    pub fn identity(&self) -> String {
        let asn = match &self.asn {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        format!("{asn}-{}", self.as_organization).replace(' ', "_")
    }
}

/// Display name shown by client apps.
pub fn display_name(label: Option<&str>, identity: &str) -> String {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => format!("{label}-{identity}"),
        None => identity.to_string(),
    }
}

/// Fixed parameters shared by all three links.
#[derive(Debug, Clone, Copy)]
pub struct LinkTemplate<'a> {
    pub uuid: &'a str,
    pub edge_addr: &'a str,
    pub edge_port: u16,
}

/// The JSON record embedded in a vmess link. Field order is part of the
/// format some clients hash, so it must not be rearranged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessRecord {
    pub v: String,
    pub ps: String,
    pub add: String,
    pub port: u16,
    pub id: String,
    pub aid: String,
    pub scy: String,
    pub net: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub path: String,
    pub tls: String,
    pub sni: String,
    pub alpn: String,
    pub fp: String,
}

impl VmessRecord {
    pub fn new(template: &LinkTemplate<'_>, hostname: &str, name: &str) -> Self {
        Self {
            v: "2".to_string(),
            ps: name.to_string(),
            add: template.edge_addr.to_string(),
            port: template.edge_port,
            id: template.uuid.to_string(),
            aid: "0".to_string(),
            scy: "none".to_string(),
            net: "ws".to_string(),
            kind: "none".to_string(),
            host: hostname.to_string(),
            path: format!("{VMESS_WS_PATH}{EARLY_DATA}"),
            tls: "tls".to_string(),
            sni: hostname.to_string(),
            alpn: String::new(),
            fp: FINGERPRINT.to_string(),
        }
    }

    /// `vmess://` followed by base64 of the JSON record.
    pub fn to_link(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("vmess://{}", STANDARD.encode(json))
    }
}

/// `/path?ed=2560`, fully percent-encoded as a query value.
fn encoded_ws_path(path: &str) -> String {
    format!("{path}{EARLY_DATA}")
        .replace('/', "%2F")
        .replace('?', "%3F")
        .replace('=', "%3D")
}

/// Render the three links in subscription order: vless, vmess, trojan.
pub fn render_links(template: &LinkTemplate<'_>, hostname: &str, name: &str) -> Vec<String> {
    let LinkTemplate {
        uuid,
        edge_addr,
        edge_port,
    } = *template;
    let fragment = utf8_percent_encode(name, FRAGMENT);

    let vless = format!(
        "vless://{uuid}@{edge_addr}:{edge_port}?encryption=none&security=tls&sni={hostname}&fp={FINGERPRINT}&type=ws&host={hostname}&path={path}#{fragment}",
        path = encoded_ws_path(VLESS_WS_PATH),
    );
    let vmess = VmessRecord::new(template, hostname, name).to_link();
    let trojan = format!(
        "trojan://{uuid}@{edge_addr}:{edge_port}?security=tls&sni={hostname}&fp={FINGERPRINT}&type=ws&host={hostname}&path={path}#{fragment}",
        path = encoded_ws_path(TROJAN_WS_PATH),
    );

    vec![vless, vmess, trojan]
}

/// Render the links and wrap them in a subscription record.
pub fn generate(template: &LinkTemplate<'_>, hostname: &str, name: &str) -> SubscriptionRecord {
    SubscriptionRecord::from_links(render_links(template, hostname, name))
}

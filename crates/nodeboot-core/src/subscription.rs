//! Subscription document: the generated links and their base64 encoding.

use std::path::Path;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::error::{Error, Result};

/// Separator between links in the decoded document.
pub const LINK_SEPARATOR: &str = "\n\n";

#[allow(clippy::unwrap_used)] // literal pattern
static NODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(vless|vmess|trojan|hysteria2|tuic)://").unwrap()
});

/// Links plus their encoded form. Both are always derived together, so the
/// encoded blob can never describe a different set of links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    raw_links: Vec<String>,
    encoded_blob: String,
}

impl SubscriptionRecord {
    pub fn from_links(raw_links: Vec<String>) -> Self {
        let encoded_blob = STANDARD.encode(raw_links.join(LINK_SEPARATOR));
        Self {
            raw_links,
            encoded_blob,
        }
    }

    /// Parse an encoded document, keeping only proxy links.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Decode(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Self::from_links(node_lines(&text)))
    }

    pub fn raw_links(&self) -> &[String] {
        &self.raw_links
    }

    pub fn encoded_blob(&self) -> &str {
        &self.encoded_blob
    }

    /// The decoded document.
    pub fn document(&self) -> String {
        self.raw_links.join(LINK_SEPARATOR)
    }

    /// Replace the file at `path` with the encoded blob.
    ///
    /// Writes a sibling temp file and renames it over the target, so readers
    /// never observe a half-written document.
    pub fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &self.encoded_blob)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load and decode a previously written document.
    pub fn read(path: &Path) -> Result<Self> {
        let encoded = std::fs::read_to_string(path)?;
        Self::decode(&encoded)
    }
}

/// Trimmed lines that carry a proxy link.
pub fn node_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| NODE_RE.is_match(line))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn links() -> Vec<String> {
        vec![
            "vless://a@h:443?x=1#n".to_string(),
            "vmess://eyJ2IjoiMiJ9".to_string(),
            "trojan://a@h:443?x=1#n".to_string(),
        ]
    }

    #[test]
    fn blob_encodes_joined_links() {
        let record = SubscriptionRecord::from_links(links());
        let decoded = STANDARD.decode(record.encoded_blob()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), record.document());
        assert!(!record.encoded_blob().contains('\n'), "no line wrapping");
    }

    #[test]
    fn decode_keeps_only_proxy_lines() {
        let doc = "\nvless://a@h\n  \nnot a link\n  trojan://b@h  \nhysteria2://c@h\n";
        let record = SubscriptionRecord::decode(&STANDARD.encode(doc)).unwrap();
        assert_eq!(
            record.raw_links(),
            ["vless://a@h", "trojan://b@h", "hysteria2://c@h"]
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            SubscriptionRecord::decode("!!not base64!!"),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn write_replaces_previous_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub.txt");
        std::fs::write(&path, "old content that is much longer than the new one").unwrap();

        let record = SubscriptionRecord::from_links(links());
        record.write(&path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), record.encoded_blob());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(SubscriptionRecord::read(&path).unwrap(), record);
    }
}

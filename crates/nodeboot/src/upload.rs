//! Publishing nodes to an aggregator and registering with the keepalive
//! service. Every call here is best-effort: failures are logged and
//! swallowed.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use nodeboot_core::config::UploadSettings;
use nodeboot_core::SubscriptionRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregator API errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Serialize)]
struct NodesPayload<'a> {
    nodes: &'a [String],
}

#[derive(Debug, Serialize)]
struct SubscriptionsPayload<'a> {
    subscription: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct KeepalivePayload<'a> {
    url: &'a str,
}

/// Client for the aggregator's node API.
#[derive(Debug, Clone)]
pub struct Uploader {
    http: reqwest::Client,
    base_url: String,
}

impl Uploader {
    /// `None` when no upload URL is configured.
    pub fn from_settings(http: &reqwest::Client, settings: &UploadSettings) -> Option<Self> {
        let base = settings
            .upload_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())?;
        Some(Self {
            http: http.clone(),
            base_url: base.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), UploadError> {
        let resp = self
            .http
            .post(self.api_url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UploadError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    pub async fn add_nodes(&self, nodes: &[String]) -> Result<(), UploadError> {
        self.post("add-nodes", &NodesPayload { nodes }).await
    }

    pub async fn delete_nodes(&self, nodes: &[String]) -> Result<(), UploadError> {
        self.post("delete-nodes", &NodesPayload { nodes }).await
    }

    pub async fn add_subscription(&self, url: &str) -> Result<(), UploadError> {
        self.post(
            "add-subscriptions",
            &SubscriptionsPayload { subscription: [url] },
        )
        .await
    }

    /// Withdraw the nodes listed in a previous run's subscription document.
    pub async fn withdraw_previous(&self, subscription_file: &Path) {
        let record = match SubscriptionRecord::read(subscription_file) {
            Ok(record) => record,
            Err(nodeboot_core::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No previous subscription to withdraw");
                return;
            }
            Err(e) => {
                warn!(path = %subscription_file.display(), error = %e, "Cannot read previous subscription");
                return;
            }
        };
        if record.raw_links().is_empty() {
            return;
        }
        match self.delete_nodes(record.raw_links()).await {
            Ok(()) => info!(count = record.raw_links().len(), "Withdrew previous nodes"),
            Err(e) => warn!(error = %e, "Failed to withdraw previous nodes"),
        }
    }

    /// Register the subscription URL when known, otherwise push the raw nodes.
    pub async fn publish(&self, subscription_url: Option<&str>, record: &SubscriptionRecord) {
        let result = match subscription_url {
            Some(url) => self.add_subscription(url).await.map(|()| "Subscription uploaded"),
            None => self
                .add_nodes(record.raw_links())
                .await
                .map(|()| "Nodes uploaded"),
        };
        match result {
            Ok(msg) => info!(url = %self.base_url, "{msg}"),
            Err(e) => warn!(url = %self.base_url, error = %e, "Upload failed"),
        }
    }
}

/// Register the project URL with the keepalive service when enabled.
pub async fn register_keepalive(http: &reqwest::Client, settings: &UploadSettings) {
    let project = settings
        .project_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let Some(project) = project.filter(|_| settings.auto_access) else {
        debug!("Automatic access disabled");
        return;
    };

    let result = http
        .post(&settings.keepalive_url)
        .timeout(REQUEST_TIMEOUT)
        .json(&KeepalivePayload { url: project })
        .send()
        .await
        .and_then(reqwest::Response::error_for_status);
    match result {
        Ok(_) => info!(url = project, "Automatic access task added"),
        Err(e) => warn!(url = project, error = %e, "Failed to add automatic access task"),
    }
}

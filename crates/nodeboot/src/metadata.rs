//! Network identity lookup used in node display names.

use std::time::Duration;

use tracing::{debug, warn};

use nodeboot_core::links::{DEFAULT_IDENTITY, NetworkMeta};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetch `{asn, asOrganization}` from `url` and fold it into an identity.
async fn fetch_meta(http: &reqwest::Client, url: &str) -> Result<NetworkMeta, reqwest::Error> {
    http.get(url)
        .timeout(LOOKUP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json::<NetworkMeta>()
        .await
}

/// `"<asn>-<organization>"`, or [`DEFAULT_IDENTITY`] when the lookup fails.
pub async fn lookup_identity(http: &reqwest::Client, url: &str) -> String {
    match fetch_meta(http, url).await {
        Ok(meta) => {
            let identity = meta.identity();
            debug!(identity = %identity, "Resolved network identity");
            identity
        }
        Err(e) => {
            warn!(url, error = %e, "Network metadata lookup failed, using default identity");
            DEFAULT_IDENTITY.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;
    use crate::fetch::http_client;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/meta")
    }

    #[tokio::test]
    async fn identity_from_metadata() {
        let url = serve(Router::new().route(
            "/meta",
            get(|| async {
                r#"{"asn":13335,"asOrganization":"Cloudflare Inc","colo":"AMS"}"#
            }),
        ))
        .await;
        let identity = lookup_identity(&http_client().unwrap(), &url).await;
        assert_eq!(identity, "13335-Cloudflare_Inc");
    }

    #[tokio::test]
    async fn error_status_falls_back() {
        let url = serve(Router::new().route(
            "/meta",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let identity = lookup_identity(&http_client().unwrap(), &url).await;
        assert_eq!(identity, DEFAULT_IDENTITY);
    }

    #[tokio::test]
    async fn malformed_body_falls_back() {
        let url = serve(Router::new().route("/meta", get(|| async { "not json" }))).await;
        let identity = lookup_identity(&http_client().unwrap(), &url).await;
        assert_eq!(identity, DEFAULT_IDENTITY);
    }
}

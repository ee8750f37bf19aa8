use std::fmt::Write;
use std::path::PathBuf;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::guard::{self, Rejection};

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Encoded subscription document (`sub.txt`).
    pub subscription_file: PathBuf,
    /// Directory served by the download routes.
    pub share_dir: PathBuf,
    /// Path segment the subscription is served under.
    pub sub_path: String,
}

/// Build the router for `state`.
pub fn build_router(state: AppState) -> Router {
    let sub_route = format!("/{}", state.sub_path);
    Router::new()
        .route("/", get(root))
        .route("/list", get(list_files))
        .route(&sub_route, get(subscription))
        .route("/download/{filename}", get(download))
        .route("/{filename}", get(download))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /`
pub async fn root() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], "Hello world!")
}

/// `GET /<sub path>` — the base64 document, 404 until it has been generated.
pub async fn subscription(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(&state.subscription_file).await {
        Ok(content) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(e) => {
            debug!(error = %e, "Subscription not available");
            (StatusCode::NOT_FOUND, "Subscription not found yet.").into_response()
        }
    }
}

/// `GET /download/<file>` and `GET /<file>`
pub async fn download(Path(filename): Path<String>, State(state): State<AppState>) -> Response {
    let path = match guard::resolve_file(&state.share_dir, &filename) {
        Ok(path) => path,
        Err(Rejection::OutsideRoot) => {
            warn!(requested = %filename, "Rejected download outside the share directory");
            return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
        }
        Err(Rejection::NotFound) => {
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let name = path
                .file_name()
                .map_or_else(|| filename.clone(), |n| n.to_string_lossy().into_owned());
            let disposition = format!(
                "attachment; filename=\"{}\"",
                name.replace(['"', '\\'], "_")
            );
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Download failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Download failed").into_response()
        }
    }
}

/// `GET /list` — links to every file in the share directory.
pub async fn list_files(State(state): State<AppState>) -> Response {
    let mut entries = match tokio::fs::read_dir(&state.share_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %state.share_dir.display(), error = %e, "Cannot read share directory");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Cannot read file directory")
                .into_response();
        }
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    Html(listing_page(&names)).into_response()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn listing_page(names: &[String]) -> String {
    let mut items = String::new();
    for name in names {
        let _ = write!(
            items,
            r#"<li><a href="/download/{href}">{label}</a></li>"#,
            href = utf8_percent_encode(name, NON_ALPHANUMERIC),
            label = escape_html(name),
        );
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Files</title></head>
<body>
<h2>Files</h2>
<ul>{items}</ul>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_escapes_names() {
        let page = listing_page(&["a b.txt".to_string(), "<x>".to_string()]);
        assert!(page.contains(r#"href="/download/a%20b%2Etxt""#));
        assert!(page.contains("&lt;x&gt;"));
        assert!(!page.contains("<x>"));
    }
}

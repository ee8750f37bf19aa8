//! Binary downloads.
//!
//! Every artifact of the plan is fetched concurrently, written next to the
//! other working files and made executable. A download that fails midway
//! leaves no partial file behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use nodeboot_core::WorkDir;
use nodeboot_core::artifacts::Artifact;

/// Redirect hops followed before a download is abandoned.
pub const MAX_REDIRECTS: usize = 10;

/// Mode applied to every downloaded binary.
pub const EXECUTABLE_MODE: u32 = 0o775;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Download errors.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download of {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download task aborted: {0}")]
    Task(String),
}

/// Build the shared HTTP client.
pub fn http_client() -> Result<reqwest::Client, FetchError> {
    // reqwest is built with `rustls-no-provider`; an `Err` here only means a
    // provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

/// Downloads binaries into the working directory.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Stream `url` into `dest` and mark it executable. Returns the byte count.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let written = match write_body(&mut resp, dest).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e);
            }
        };
        make_executable(dest).await?;
        debug!(url, path = %dest.display(), bytes = written, "Downloaded");
        Ok(written)
    }

    /// Fetch every artifact concurrently. The first failure aborts the rest.
    pub async fn download_all(
        &self,
        artifacts: &[Artifact],
        work: &WorkDir,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let mut tasks = JoinSet::new();
        for artifact in artifacts {
            let fetcher = self.clone();
            let url = artifact.url.clone();
            let dest = work.binary(&artifact.file_name);
            tasks.spawn(async move {
                let result = fetcher.download(&url, &dest).await;
                (url, dest, result)
            });
        }

        let mut paths = Vec::with_capacity(artifacts.len());
        while let Some(joined) = tasks.join_next().await {
            let (url, dest, result) = joined.map_err(|e| FetchError::Task(e.to_string()))?;
            match result {
                Ok(bytes) => {
                    info!(file = %dest.display(), bytes, "Download succeeded");
                    paths.push(dest);
                }
                Err(e) => {
                    error!(url = %url, error = %e, "Download failed");
                    // Nothing is launched from an incomplete set.
                    tasks.shutdown().await;
                    remove_partials(artifacts, work).await;
                    return Err(e);
                }
            }
        }
        Ok(paths)
    }
}

async fn write_body(resp: &mut reqwest::Response, dest: &Path) -> Result<u64, FetchError> {
    let write_err = |source: std::io::Error| FetchError::Write {
        path: dest.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    Ok(written)
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(EXECUTABLE_MODE))
        .await
        .map_err(|source| FetchError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn make_executable(_path: &Path) -> Result<(), FetchError> {
    Ok(())
}

async fn remove_partials(artifacts: &[Artifact], work: &WorkDir) {
    for artifact in artifacts {
        let _ = tokio::fs::remove_file(work.binary(&artifact.file_name)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::response::Redirect;
    use axum::routing::get;
    use nodeboot_core::artifacts::Role;

    use super::*;

    async fn mirror() -> SocketAddr {
        let app = Router::new()
            .route("/web", get(|| async { "relay-binary" }))
            .route("/bot", get(|| async { "tunnel-binary" }))
            .route("/moved", get(|| async { Redirect::temporary("/web") }))
            .route("/loop", get(|| async { Redirect::temporary("/loop") }))
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn artifact(role: Role, file_name: &str, url: String) -> Artifact {
        Artifact {
            role,
            file_name: file_name.to_string(),
            url,
        }
    }

    #[tokio::test]
    async fn downloads_all_and_sets_mode() {
        let addr = mirror().await;
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path());
        let fetcher = Fetcher::new(http_client().unwrap());

        let plan = vec![
            artifact(Role::Relay, "web", format!("http://{addr}/web")),
            artifact(Role::Tunnel, "bot", format!("http://{addr}/bot")),
        ];
        let paths = fetcher.download_all(&plan, &work).await.unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read_to_string(work.binary("web")).unwrap(), "relay-binary");
        assert_eq!(std::fs::read_to_string(work.binary("bot")).unwrap(), "tunnel-binary");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(work.binary("web")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, EXECUTABLE_MODE);
        }
    }

    #[tokio::test]
    async fn follows_redirects() {
        let addr = mirror().await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("web");
        let fetcher = Fetcher::new(http_client().unwrap());

        fetcher.download(&format!("http://{addr}/moved"), &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "relay-binary");
    }

    #[tokio::test]
    async fn redirect_loop_is_an_error() {
        let addr = mirror().await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("web");
        let fetcher = Fetcher::new(http_client().unwrap());

        let err = fetcher.download(&format!("http://{addr}/loop"), &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::Http(_)), "got {err:?}");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_files() {
        let addr = mirror().await;
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path());
        let fetcher = Fetcher::new(http_client().unwrap());

        let plan = vec![
            artifact(Role::Relay, "web", format!("http://{addr}/web")),
            artifact(Role::Tunnel, "bot", format!("http://{addr}/gone")),
        ];
        let err = fetcher.download_all(&plan, &work).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }), "got {err:?}");
        assert!(!work.binary("bot").exists());
        assert!(!work.binary("web").exists());
    }
}

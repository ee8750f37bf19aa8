//! Minimal HTTP front.
//!
//! Serves a greeting on `/`, the subscription document on `/<sub path>`, a
//! listing of the share directory on `/list`, and files from that directory
//! on `/download/<file>` and `/<file>`.

pub mod guard;
pub mod routes;

use std::net::SocketAddr;

use tracing::info;

pub use routes::{AppState, build_router};

/// Bind `addr` and serve until the task is dropped or the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP front listening");
    axum::serve(listener, build_router(state)).await
}

//! Delayed removal of bootstrap leftovers.
//!
//! Once the node is up, the downloaded binaries, the relay configuration and
//! the tunnel log are no longer needed on disk. Running children keep their
//! already opened executables.

use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use nodeboot_core::WorkDir;
use nodeboot_core::workdir::remove_files;

/// Files removed by the delayed cleanup.
pub fn targets(work: &WorkDir, binaries: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = vec![work.boot_log(), work.relay_config()];
    paths.extend(binaries.iter().cloned());
    paths
}

/// Remove `paths` after `delay` on a background task.
pub fn schedule(delay: Duration, paths: Vec<PathBuf>) -> JoinHandle<()> {
    info!(delay_secs = delay.as_secs(), files = paths.len(), "Scheduled cleanup");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        remove_files(&paths);
        info!("Cleanup done, node is running");
    })
}

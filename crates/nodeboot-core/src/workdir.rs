//! Layout of the flat working directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Leftovers from a previous run, removed before anything is written.
pub const STALE_FILES: &[&str] = &[
    "web", "bot", "npm", "php", "sub.txt", "boot.log", "list.txt",
];

/// Typed accessors for every file the bootstrap reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it is missing. Returns `true` when it was created.
    pub fn ensure(&self) -> io::Result<bool> {
        if self.root.is_dir() {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.root)?;
        Ok(true)
    }

    /// Relay configuration (`config.json`).
    pub fn relay_config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Monitoring agent configuration (`config.yaml`).
    pub fn agent_config(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn tunnel_credentials(&self) -> PathBuf {
        self.root.join("tunnel.json")
    }

    pub fn tunnel_config(&self) -> PathBuf {
        self.root.join("tunnel.yml")
    }

    /// Log file the quick tunnel writes its assigned hostname to.
    pub fn boot_log(&self) -> PathBuf {
        self.root.join("boot.log")
    }

    /// Base64 subscription document served over HTTP.
    pub fn subscription(&self) -> PathBuf {
        self.root.join("sub.txt")
    }

    /// Persisted client identifier.
    pub fn identifier(&self) -> PathBuf {
        self.root.join(".uuid")
    }

    pub fn binary(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Remove leftovers of a previous run. Failures are logged and skipped.
    pub fn remove_stale(&self) {
        let paths: Vec<PathBuf> = STALE_FILES.iter().map(|f| self.root.join(f)).collect();
        remove_files(&paths);
    }
}

/// Best-effort removal of plain files; missing files are not an error.
pub fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_once() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path().join("tmp"));
        assert!(work.ensure().unwrap());
        assert!(!work.ensure().unwrap());
        assert!(work.root().is_dir());
    }

    #[test]
    fn remove_stale_keeps_identifier() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::new(tmp.path());
        std::fs::write(work.identifier(), "id").unwrap();
        std::fs::write(work.boot_log(), "log").unwrap();
        std::fs::write(work.subscription(), "sub").unwrap();
        std::fs::write(work.binary("web"), "elf").unwrap();

        work.remove_stale();

        assert!(work.identifier().exists());
        assert!(!work.boot_log().exists());
        assert!(!work.subscription().exists());
        assert!(!work.binary("web").exists());
    }

    #[test]
    fn remove_files_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        remove_files(&[tmp.path().join("nope")]);
    }
}

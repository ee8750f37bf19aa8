//! Quick-tunnel hostname discovery.
//!
//! The tunnel client announces the hostname it was assigned in its log file
//! some time after start. Discovery polls that file; when nothing shows up
//! within the attempt timeout the client is stopped, the log removed and the
//! client started again after an exponential backoff delay. The number of
//! restarts is bounded by [`RetryPolicy::max_attempts`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Domain under which quick tunnels are published.
pub const QUICK_TUNNEL_SUFFIX: &str = "trycloudflare.com";

/// The control-plane host shows up in error lines and is never an assignment.
const API_HOST: &str = "api.trycloudflare.com";

#[allow(clippy::unwrap_used)] // literal pattern
static HOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"https?://([^ ]*{})/?", regex::escape(QUICK_TUNNEL_SUFFIX));
    Regex::new(&pattern).unwrap()
});

/// All announced hostnames, in file order.
pub fn scan_hostnames(log: &str) -> Vec<String> {
    log.lines()
        .filter_map(|line| HOST_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|host| host != API_HOST)
        .collect()
}

/// The first announced hostname, if any.
pub fn first_hostname(log: &str) -> Option<String> {
    scan_hostnames(log).into_iter().next()
}

/// Read `path` and return its first hostname. A missing file counts as empty.
pub async fn read_hostname(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => first_hostname(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Tunnel log not readable yet");
            None
        }
    }
}

/// What is known about the tunnel's public hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelSession {
    pub hostname: Option<String>,
    pub discovered_at: Option<SystemTime>,
    pub retry_count: u32,
}

impl TunnelSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for a named tunnel whose hostname is configured.
    pub fn fixed(hostname: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.mark_found(hostname.into());
        session
    }

    fn mark_found(&mut self, hostname: String) {
        self.hostname = Some(hostname);
        self.discovered_at = Some(SystemTime::now());
    }

    /// Forget everything; used when discovery starts over.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Discovery state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Still looking; `attempt` restarts have been made so far.
    Searching { attempt: u32 },
    Found(String),
    Failed { attempts: u32 },
}

impl DiscoveryState {
    /// Apply the result of one scan.
    #[must_use]
    pub fn advance(self, hostname: Option<String>, policy: &RetryPolicy) -> Self {
        match self {
            Self::Searching { attempt } => match hostname {
                Some(host) => Self::Found(host),
                None if policy.should_retry(attempt) => Self::Searching {
                    attempt: attempt + 1,
                },
                None => Self::Failed { attempts: attempt },
            },
            terminal => terminal,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Searching { .. })
    }
}

/// Lifecycle hooks for the tunnel client used during discovery.
pub trait TunnelControl: Send {
    /// Stop the client. Must tolerate a process that already exited.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    /// Start the client with logging into the discovery log.
    fn start(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Drives [`DiscoveryState`] against a live tunnel client.
pub struct DomainDiscovery<T> {
    log_path: PathBuf,
    policy: RetryPolicy,
    control: T,
    session: TunnelSession,
}

impl<T: TunnelControl> DomainDiscovery<T> {
    pub fn new(log_path: PathBuf, policy: RetryPolicy, control: T) -> Self {
        Self {
            log_path,
            policy,
            control,
            session: TunnelSession::new(),
        }
    }

    pub const fn session(&self) -> &TunnelSession {
        &self.session
    }

    /// Hand back the tunnel control, e.g. to terminate the client on shutdown.
    pub fn into_control(self) -> T {
        self.control
    }

    /// Run until a hostname is found or the retry budget is spent.
    pub async fn run(&mut self) -> Result<TunnelSession> {
        self.session.reset();
        let mut state = DiscoveryState::Searching { attempt: 0 };

        loop {
            let hostname = self.wait_for_hostname().await;
            state = state.advance(hostname, &self.policy);

            match &state {
                DiscoveryState::Found(host) => {
                    info!(hostname = %host, restarts = self.session.retry_count, "Tunnel hostname discovered");
                    self.session.mark_found(host.clone());
                    return Ok(self.session.clone());
                }
                DiscoveryState::Failed { attempts } => {
                    error!(attempts, log = %self.log_path.display(), "Tunnel hostname not found, giving up");
                    return Err(Error::DiscoveryFailed {
                        attempts: *attempts,
                    });
                }
                DiscoveryState::Searching { attempt } => {
                    self.session.retry_count = *attempt;
                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        "Tunnel hostname not found, restarting tunnel client"
                    );
                    self.restart(delay).await;
                }
            }
        }
    }

    async fn restart(&mut self, delay: std::time::Duration) {
        self.control.stop().await;
        if let Err(e) = tokio::fs::remove_file(&self.log_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.log_path.display(), error = %e, "Failed to remove tunnel log");
            }
        }
        sleep(delay).await;
        if let Err(e) = self.control.start().await {
            warn!(error = %e, "Failed to relaunch tunnel client");
        }
    }

    /// Poll the log until a hostname appears or the attempt times out.
    async fn wait_for_hostname(&self) -> Option<String> {
        let deadline = Instant::now() + self.policy.attempt_timeout;
        loop {
            if let Some(host) = read_hostname(&self.log_path).await {
                return Some(host);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(self.policy.poll_interval).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const LOG: &str = "\
2024-05-01T10:00:00Z INF Requesting new quick Tunnel on trycloudflare.com...
2024-05-01T10:00:01Z INF +----------------------------------------------------+
2024-05-01T10:00:01Z INF |  https://fancy-words-here-now.trycloudflare.com    |
2024-05-01T10:00:01Z INF +----------------------------------------------------+
";

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            max_attempts,
            poll_interval: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(20),
        }
    }

    /// Tunnel stand-in that announces a hostname on its n-th start.
    struct FakeTunnel {
        log: PathBuf,
        announce_on_start: Option<u32>,
        starts: u32,
        stops: u32,
    }

    impl FakeTunnel {
        fn new(log: PathBuf, announce_on_start: Option<u32>) -> Self {
            Self {
                log,
                announce_on_start,
                starts: 0,
                stops: 0,
            }
        }
    }

    impl TunnelControl for FakeTunnel {
        async fn stop(&mut self) {
            self.stops += 1;
        }

        async fn start(&mut self) -> Result<()> {
            self.starts += 1;
            if self.announce_on_start == Some(self.starts) {
                std::fs::write(&self.log, LOG)?;
            }
            Ok(())
        }
    }

    #[test]
    fn scan_finds_hostname_in_banner() {
        assert_eq!(
            scan_hostnames(LOG),
            vec!["fancy-words-here-now.trycloudflare.com".to_string()]
        );
    }

    #[test]
    fn first_match_in_file_order_wins() {
        let log = "INF https://first-one.trycloudflare.com\nINF https://second-one.trycloudflare.com/\n";
        assert_eq!(scan_hostnames(log).len(), 2);
        assert_eq!(first_hostname(log).unwrap(), "first-one.trycloudflare.com");
    }

    #[test]
    fn api_host_is_ignored() {
        let log = "ERR failed to request quick Tunnel: Post \"https://api.trycloudflare.com/tunnel\": EOF\n";
        assert!(first_hostname(log).is_none());
    }

    #[test]
    fn unrelated_urls_are_ignored() {
        assert!(first_hostname("INF https://example.com is up\n").is_none());
        assert!(first_hostname("").is_none());
    }

    #[test]
    fn state_machine_transitions() {
        let policy = fast_policy(2);
        let s = DiscoveryState::Searching { attempt: 0 };
        let s = s.advance(None, &policy);
        assert_eq!(s, DiscoveryState::Searching { attempt: 1 });
        let s = s.advance(None, &policy);
        assert_eq!(s, DiscoveryState::Searching { attempt: 2 });
        let s = s.advance(None, &policy);
        assert_eq!(s, DiscoveryState::Failed { attempts: 2 });
        assert!(s.is_terminal());
        assert_eq!(s.clone().advance(Some("h".into()), &policy), s);
    }

    #[test]
    fn state_machine_found() {
        let s = DiscoveryState::Searching { attempt: 1 }.advance(Some("h".into()), &fast_policy(3));
        assert_eq!(s, DiscoveryState::Found("h".into()));
    }

    #[tokio::test]
    async fn existing_log_needs_no_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("boot.log");
        std::fs::write(&log, LOG).unwrap();

        let mut discovery = DomainDiscovery::new(log, fast_policy(3), FakeTunnel::new(PathBuf::new(), None));
        let session = discovery.run().await.unwrap();
        assert_eq!(session.hostname.as_deref(), Some("fancy-words-here-now.trycloudflare.com"));
        assert!(session.discovered_at.is_some());
        assert_eq!(session.retry_count, 0);

        let tunnel = discovery.into_control();
        assert_eq!((tunnel.starts, tunnel.stops), (0, 0));
    }

    #[tokio::test]
    async fn hostname_found_after_restarts() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("boot.log");
        let fake = FakeTunnel::new(log.clone(), Some(2));

        let mut discovery = DomainDiscovery::new(log, fast_policy(5), fake);
        let session = discovery.run().await.unwrap();
        assert_eq!(session.retry_count, 2);
        assert_eq!(discovery.session(), &session);

        let tunnel = discovery.into_control();
        assert_eq!(tunnel.starts, 2);
        assert_eq!(tunnel.stops, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("boot.log");
        std::fs::write(&log, "INF starting tunnel\n").unwrap();

        let mut discovery = DomainDiscovery::new(log.clone(), fast_policy(3), FakeTunnel::new(log.clone(), None));
        let err = discovery.run().await.unwrap_err();
        assert!(matches!(err, Error::DiscoveryFailed { attempts: 3 }));
        assert!(discovery.session().hostname.is_none());

        let tunnel = discovery.into_control();
        assert!(tunnel.stops >= 1, "at least one restart before giving up");
        assert_eq!(tunnel.stops, 3);
        assert!(!log.exists(), "stale log is removed on restart");
    }

    #[test]
    fn fixed_session_is_found() {
        let session = TunnelSession::fixed("node.example.com");
        assert_eq!(session.hostname.as_deref(), Some("node.example.com"));
        assert!(session.discovered_at.is_some());
        let mut session = session;
        session.reset();
        assert_eq!(session, TunnelSession::new());
    }
}

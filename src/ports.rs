//! Collaborator interfaces.
//!
//! The monitor only observes and restarts the services it watches; every
//! side effect goes through one of these traits so the evaluation and
//! recovery logic can run against scripted fakes.

use std::process::Output;
use std::time::Duration;

use anyhow::Result;

use crate::alert::Alert;

// ── Values ────────────────────────────────────────────────────────────────────

/// Result of one reachability sweep over the reference hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reachability {
    pub(crate) reachable: usize,
    pub(crate) total: usize,
}

impl Reachability {
    pub(crate) fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.reachable * 100 / self.total) as u8
    }

    pub(crate) fn is_total_loss(&self) -> bool {
        self.reachable == 0
    }
}

/// Metadata reported by the tunnel client for an active tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TunnelInfo {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) hostname: Option<String>,
    pub(crate) connections: usize,
}

// ── Ports ─────────────────────────────────────────────────────────────────────

#[allow(async_fn_in_trait)]
pub(crate) trait ServiceManager {
    async fn is_active(&self, name: &str) -> Result<bool>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
}

#[allow(async_fn_in_trait)]
pub(crate) trait NetworkReachability {
    /// Whether `host` answers one echo request within `timeout`; never fails.
    async fn ping(&self, host: &str, timeout: Duration) -> bool;
    /// Whether a TCP listener accepts connections on `host:port`.
    async fn port_open(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

#[allow(async_fn_in_trait)]
pub(crate) trait TunnelClient {
    async fn get_info(&self, tunnel_id: &str, timeout: Duration) -> Result<TunnelInfo>;
    /// Most recent log lines of the tunnel client, oldest first.
    async fn recent_log_lines(&self, limit: usize) -> Result<Vec<String>>;
}

#[allow(async_fn_in_trait)]
pub(crate) trait HttpProbe {
    /// Issue one GET and return the HTTP status code of whatever answered.
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16>;
}

/// Everything the probes need from the machine being watched.
pub(crate) trait TunnelHost: ServiceManager + NetworkReachability + TunnelClient + HttpProbe {}

impl<T> TunnelHost for T where T: ServiceManager + NetworkReachability + TunnelClient + HttpProbe {}

/// Process execution, abstracted so probe implementations can be tested
/// without spawning real binaries.
#[allow(async_fn_in_trait)]
pub(crate) trait CommandRunner {
    /// Run a program and capture its output. The child is killed when
    /// `timeout` elapses.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output>;
    /// Run a program with `stdin` piped to it.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output>;
}

/// Destination for alerts. Delivery failures are the sink's own concern.
#[allow(async_fn_in_trait)]
pub(crate) trait AlertSink {
    async fn dispatch(&self, alert: &Alert);
}

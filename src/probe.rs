//! Probe layer.
//!
//! Every probe is bounded by a timeout and reduces collaborator errors to a
//! failed result; nothing here returns an error to its caller.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::ports::{
    HttpProbe, NetworkReachability, Reachability, ServiceManager, TunnelClient, TunnelInfo,
};

const LOCALHOST: &str = "127.0.0.1";

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("timed out after {}", humantime::format_duration(timeout)),
    }
}

/// Whether the tunnel client service is active. An inactive service gets a
/// single restart when `restart_inactive` is set; anything further is left
/// to the recovery controller.
pub(crate) async fn service_running<S: ServiceManager>(
    services: &S,
    name: &str,
    restart_inactive: bool,
    timeout: Duration,
) -> bool {
    match bounded(timeout, services.is_active(name)).await {
        Ok(true) => return true,
        Ok(false) => {}
        Err(e) => warn!(service = name, error = %e, "service status query failed"),
    }
    if !restart_inactive {
        return false;
    }

    warn!(service = name, "service inactive, attempting one restart");
    if let Err(e) = bounded(timeout, services.start(name)).await {
        warn!(service = name, error = %e, "service restart failed");
        return false;
    }
    match bounded(timeout, services.is_active(name)).await {
        Ok(active) => active,
        Err(e) => {
            warn!(service = name, error = %e, "service status query failed");
            false
        }
    }
}

/// Reachability of the reference hosts, pinged one after another. Each host
/// gets at most `timeout`; a host that overruns counts as unreachable and
/// the sweep carries on with the rest.
pub(crate) async fn network<N: NetworkReachability>(
    net: &N,
    hosts: &[String],
    timeout: Duration,
) -> Reachability {
    let mut reachable = 0;
    for host in hosts {
        match tokio::time::timeout(timeout, net.ping(host, timeout)).await {
            Ok(true) => reachable += 1,
            Ok(false) => debug!(host = %host, "host unreachable"),
            Err(_) => debug!(host = %host, "ping timed out"),
        }
    }
    let reach = Reachability {
        reachable,
        total: hosts.len(),
    };
    if reach.is_total_loss() {
        warn!(hosts = hosts.len(), "no reference host reachable");
    } else {
        debug!(reachable, total = reach.total, "network probe");
    }
    reach
}

/// Tunnel metadata from the client, or `None` when it cannot be queried.
pub(crate) async fn tunnel_info<T: TunnelClient>(
    client: &T,
    tunnel_id: &str,
    timeout: Duration,
) -> Option<TunnelInfo> {
    match bounded(timeout, client.get_info(tunnel_id, timeout)).await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(tunnel_id, error = %e, "tunnel info unavailable");
            None
        }
    }
}

/// Public hostname of the tunnel.
///
/// Tries the structured info first, then the most recent hostname-shaped
/// match in the client's log, then a hostname pinned in the identity file.
pub(crate) async fn discover_hostname<T: TunnelClient>(
    client: &T,
    info: Option<&TunnelInfo>,
    pattern: &Regex,
    log_lines: usize,
    pinned: Option<&str>,
    timeout: Duration,
) -> Option<String> {
    if let Some(hostname) = info.and_then(|i| i.hostname.clone()) {
        return Some(hostname);
    }

    match bounded(timeout, client.recent_log_lines(log_lines)).await {
        Ok(lines) => {
            if let Some(hostname) = scan_for_hostname(&lines, pattern) {
                debug!(hostname = %hostname, "hostname recovered from tunnel log");
                return Some(hostname);
            }
        }
        Err(e) => debug!(error = %e, "tunnel log unavailable"),
    }

    pinned.filter(|h| !h.is_empty()).map(str::to_string)
}

fn scan_for_hostname(lines: &[String], pattern: &Regex) -> Option<String> {
    lines
        .iter()
        .rev()
        .find_map(|line| pattern.find_iter(line).last())
        .map(|m| m.as_str().to_string())
}

/// One outbound request to the public hostname. Any HTTP answer counts as
/// reachable; the body is not inspected.
pub(crate) async fn tunnel_http<H: HttpProbe>(
    http: &H,
    hostname: &str,
    timeout: Duration,
) -> bool {
    let url = match Url::parse(&format!("https://{}/", hostname)) {
        Ok(url) => url,
        Err(e) => {
            warn!(hostname, error = %e, "hostname does not form a valid URL");
            return false;
        }
    };
    match bounded(timeout, http.get(url.as_str(), timeout)).await {
        Ok(status) => {
            debug!(hostname, status, "tunnel answered");
            true
        }
        Err(e) => {
            warn!(hostname, error = %e, "tunnel HTTP probe failed");
            false
        }
    }
}

/// Whether the local shell service is active and listening on its port.
pub(crate) async fn local_service<H: ServiceManager + NetworkReachability>(
    host: &H,
    name: &str,
    port: u16,
    timeout: Duration,
) -> bool {
    let active = match bounded(timeout, host.is_active(name)).await {
        Ok(active) => active,
        Err(e) => {
            warn!(service = name, error = %e, "service status query failed");
            false
        }
    };
    if !active {
        return false;
    }
    let listening = host.port_open(LOCALHOST, port, timeout).await;
    if !listening {
        warn!(service = name, port, "service active but port closed");
    }
    listening
}

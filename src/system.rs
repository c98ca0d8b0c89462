//! Production collaborators: the service manager, `ping`, the tunnel client
//! CLI, the journal and plain HTTP.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Settings;
use crate::ports::{
    CommandRunner, HttpProbe, NetworkReachability, ServiceManager, TunnelClient, TunnelInfo,
};

pub(crate) struct SystemHost<R> {
    runner: R,
    client: Client,
    service_manager: String,
    service_timeout: Duration,
    tunnel_program: String,
    tunnel_service: String,
    log_file: Option<PathBuf>,
}

impl<R: CommandRunner> SystemHost<R> {
    pub(crate) fn new(runner: R, settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.alerting.user_agent)
            .timeout(settings.probes.http_timeout)
            .build()?;
        Ok(Self {
            runner,
            client,
            service_manager: settings.probes.service_manager.clone(),
            service_timeout: settings.probes.service_timeout,
            tunnel_program: settings.tunnel.client_program.clone(),
            tunnel_service: settings.tunnel.service.clone(),
            log_file: settings.tunnel.log_file.clone(),
        })
    }

    async fn manage(&self, verb: &str, name: &str) -> Result<Output> {
        self.runner
            .run(&self.service_manager, &[verb, name], self.service_timeout)
            .await
    }
}

fn ensure_success(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("{} exited with {}: {}", what, output.status, stderr.trim())
}

impl<R: CommandRunner> ServiceManager for SystemHost<R> {
    async fn is_active(&self, name: &str) -> Result<bool> {
        let output = self.manage("is-active", name).await?;
        let state = String::from_utf8_lossy(&output.stdout);
        debug!(service = name, state = %state.trim(), "service state");
        Ok(output.status.success() && state.trim() == "active")
    }

    async fn start(&self, name: &str) -> Result<()> {
        let output = self.manage("start", name).await?;
        ensure_success(&output, &format!("{} start {}", self.service_manager, name))
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let output = self.manage("stop", name).await?;
        ensure_success(&output, &format!("{} stop {}", self.service_manager, name))
    }
}

impl<R: CommandRunner> NetworkReachability for SystemHost<R> {
    async fn ping(&self, host: &str, timeout: Duration) -> bool {
        // -W takes whole seconds; settings guarantee at least one
        let wait = timeout.as_secs().max(1).to_string();
        match self
            .runner
            .run("ping", &["-c", "1", "-W", &wait, host], timeout)
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(host, error = %e, "ping failed");
                false
            }
        }
    }

    async fn port_open(&self, host: &str, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    conns: Vec<serde_json::Value>,
}

fn parse_tunnel_info(tunnel_id: &str, stdout: &[u8]) -> Result<TunnelInfo> {
    let response: InfoResponse =
        serde_json::from_slice(stdout).context("tunnel info output is not valid JSON")?;
    Ok(TunnelInfo {
        id: if response.id.is_empty() {
            tunnel_id.to_string()
        } else {
            response.id
        },
        name: response.name,
        hostname: response.hostname.filter(|h| !h.is_empty()),
        connections: response.conns.len(),
    })
}

fn last_lines(text: &str, limit: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

impl<R: CommandRunner> TunnelClient for SystemHost<R> {
    async fn get_info(&self, tunnel_id: &str, timeout: Duration) -> Result<TunnelInfo> {
        let output = self
            .runner
            .run(
                &self.tunnel_program,
                &["tunnel", "info", "--output", "json", tunnel_id],
                timeout,
            )
            .await?;
        ensure_success(&output, &format!("{} tunnel info", self.tunnel_program))?;
        parse_tunnel_info(tunnel_id, &output.stdout)
    }

    async fn recent_log_lines(&self, limit: usize) -> Result<Vec<String>> {
        if let Some(path) = &self.log_file {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading tunnel log {}", path.display()))?;
            return Ok(last_lines(&text, limit));
        }
        let count = limit.to_string();
        let output = self
            .runner
            .run(
                "journalctl",
                &["-u", &self.tunnel_service, "-n", &count, "--no-pager", "-o", "cat"],
                self.service_timeout,
            )
            .await?;
        ensure_success(&output, "journalctl")?;
        Ok(last_lines(&String::from_utf8_lossy(&output.stdout), limit))
    }
}

impl<R: CommandRunner> HttpProbe for SystemHost<R> {
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16> {
        let resp = self.client.get(url).timeout(timeout).send().await?;
        Ok(resp.status().as_u16())
    }
}

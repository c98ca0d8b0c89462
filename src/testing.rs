//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Output;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::alert::Alert;
use crate::config::Settings;
use crate::ports::{
    AlertSink, CommandRunner, HttpProbe, NetworkReachability, ServiceManager, TunnelClient,
    TunnelInfo,
};

pub(crate) const TUNNEL_SERVICE: &str = "cloudflared";

/// Build an `ExitStatus` from a logical exit code.
#[cfg(unix)]
pub(crate) fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub(crate) fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code as u32)
}

pub(crate) fn ok_output(stdout: &[u8]) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
    }
}

pub(crate) fn fail_output() -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: b"failed".to_vec(),
    }
}

/// Settings pointing every file path into `dir`, with a valid identity file.
pub(crate) fn test_settings(dir: &Path) -> Settings {
    let identity = dir.join("tunnel.json");
    std::fs::write(
        &identity,
        r#"{"tunnel_id":"6ff42ae2","credentials_file":"/etc/cloudflared/6ff42ae2.json"}"#,
    )
    .unwrap();
    let mut settings = Settings::default();
    settings.tunnel.identity_file = identity;
    settings.reporting.report_dir = dir.join("reports");
    settings.reporting.history_path = dir.join("checks.jsonl");
    settings
}

/// Replays canned process outputs and records what it was asked to run.
/// Runs out of script => error.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    outputs: Mutex<VecDeque<Output>>,
    calls: Mutex<Vec<String>>,
    stdin: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn with(outputs: Vec<Output>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn stdin(&self) -> Vec<String> {
        self.stdin.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], _timeout: Duration) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", program, args.join(" ")));
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted output left for {program}"))
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        self.stdin
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(stdin).into_owned());
        self.run(program, args, timeout).await
    }
}

/// Observable state of the fake machine.
#[derive(Debug, Clone)]
pub(crate) struct FakeWorld {
    pub(crate) tunnel_active: bool,
    pub(crate) shell_active: bool,
    pub(crate) port_open: bool,
    /// Reachable hosts per sweep; the last hosts of a sweep are the live ones.
    pub(crate) reachable: usize,
    /// Per-sweep reachable counts consumed before falling back to `reachable`.
    pub(crate) network_script: VecDeque<usize>,
    /// Length of one sweep over the reference hosts.
    pub(crate) hosts_per_sweep: usize,
    /// How long an unreachable host takes to fail its ping.
    pub(crate) dead_host_delay: Option<Duration>,
    sweep_position: usize,
    sweep_reachable: usize,
    pub(crate) info_available: bool,
    pub(crate) info_hostname: Option<String>,
    pub(crate) log_lines: Vec<String>,
    pub(crate) http_status: Option<u16>,
    pub(crate) start_activates: bool,
    pub(crate) start_fails: bool,
    /// Starting the tunnel service brings its public endpoint back.
    pub(crate) restart_heals: bool,
    pub(crate) status_delay: Option<Duration>,
    pub(crate) starts: u32,
    pub(crate) stops: u32,
    pub(crate) network_tests: u32,
}

impl FakeWorld {
    fn healthy() -> Self {
        Self {
            tunnel_active: true,
            shell_active: true,
            port_open: true,
            reachable: usize::MAX,
            network_script: VecDeque::new(),
            hosts_per_sweep: 3,
            dead_host_delay: None,
            sweep_position: 0,
            sweep_reachable: 0,
            info_available: true,
            info_hostname: Some("agent-shell.example.com".to_string()),
            log_lines: Vec::new(),
            http_status: Some(200),
            start_activates: true,
            start_fails: false,
            restart_heals: false,
            status_delay: None,
            starts: 0,
            stops: 0,
            network_tests: 0,
        }
    }
}

pub(crate) struct FakeHost {
    world: Mutex<FakeWorld>,
}

impl FakeHost {
    pub(crate) fn healthy() -> Self {
        Self {
            world: Mutex::new(FakeWorld::healthy()),
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut FakeWorld)) {
        f(&mut self.world.lock().unwrap());
    }

    pub(crate) fn world(&self) -> FakeWorld {
        self.world.lock().unwrap().clone()
    }
}

impl ServiceManager for FakeHost {
    async fn is_active(&self, name: &str) -> Result<bool> {
        let delay = self.world.lock().unwrap().status_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let world = self.world.lock().unwrap();
        Ok(if name == TUNNEL_SERVICE {
            world.tunnel_active
        } else {
            world.shell_active
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut world = self.world.lock().unwrap();
        if name != TUNNEL_SERVICE {
            world.shell_active = true;
            return Ok(());
        }
        world.starts += 1;
        if world.start_fails {
            anyhow::bail!("start {name} failed");
        }
        if world.start_activates {
            world.tunnel_active = true;
        }
        if world.restart_heals {
            world.tunnel_active = true;
            world.info_available = true;
            world.http_status = Some(200);
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut world = self.world.lock().unwrap();
        if name == TUNNEL_SERVICE {
            world.stops += 1;
            world.tunnel_active = false;
        } else {
            world.shell_active = false;
        }
        Ok(())
    }
}

impl NetworkReachability for FakeHost {
    async fn ping(&self, _host: &str, _timeout: Duration) -> bool {
        let (alive, delay) = {
            let mut world = self.world.lock().unwrap();
            if world.sweep_position == 0 {
                world.network_tests += 1;
                world.sweep_reachable =
                    world.network_script.pop_front().unwrap_or(world.reachable);
            }
            let dead = world.hosts_per_sweep.saturating_sub(world.sweep_reachable);
            let alive = world.sweep_position >= dead;
            world.sweep_position = (world.sweep_position + 1) % world.hosts_per_sweep.max(1);
            (alive, world.dead_host_delay)
        };
        if !alive {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        alive
    }

    async fn port_open(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        self.world.lock().unwrap().port_open
    }
}

impl TunnelClient for FakeHost {
    async fn get_info(&self, tunnel_id: &str, _timeout: Duration) -> Result<TunnelInfo> {
        let world = self.world.lock().unwrap();
        if !world.info_available {
            anyhow::bail!("tunnel {tunnel_id} not found");
        }
        Ok(TunnelInfo {
            id: tunnel_id.to_string(),
            name: Some("agent-shell".to_string()),
            hostname: world.info_hostname.clone(),
            connections: 4,
        })
    }

    async fn recent_log_lines(&self, limit: usize) -> Result<Vec<String>> {
        let world = self.world.lock().unwrap();
        let start = world.log_lines.len().saturating_sub(limit);
        Ok(world.log_lines[start..].to_vec())
    }
}

impl HttpProbe for FakeHost {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<u16> {
        self.world
            .lock()
            .unwrap()
            .http_status
            .ok_or_else(|| anyhow::anyhow!("connection to {url} refused"))
    }
}

#[derive(Default)]
pub(crate) struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub(crate) fn subjects(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.subject.clone())
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.message.clone())
            .collect()
    }
}

impl AlertSink for RecordingAlerts {
    async fn dispatch(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, File};
use regex::Regex;
use serde::Deserialize;
use url::Url;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct TunnelSettings {
    pub(crate) service: String,
    pub(crate) identity_file: PathBuf,
    pub(crate) client_program: String,
    pub(crate) log_file: Option<PathBuf>,
    pub(crate) log_lines: usize,
    pub(crate) hostname_pattern: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            service: "cloudflared".to_string(),
            identity_file: PathBuf::from("/etc/cloudflared/tunnel.json"),
            client_program: "cloudflared".to_string(),
            log_file: None,
            log_lines: 200,
            hostname_pattern: r"[a-z0-9-]+(?:\.[a-z0-9-]+)*\.trycloudflare\.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ShellSettings {
    pub(crate) service: String,
    pub(crate) port: u16,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            service: "ssh".to_string(),
            port: 22,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ProbeSettings {
    pub(crate) reference_hosts: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub(crate) network_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) info_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) http_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) service_timeout: Duration,
    pub(crate) min_network_percent: u8,
    pub(crate) restart_inactive_service: bool,
    pub(crate) service_manager: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            reference_hosts: vec![
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
                "9.9.9.9".to_string(),
            ],
            network_timeout: Duration::from_secs(3),
            info_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(10),
            service_timeout: Duration::from_secs(15),
            min_network_percent: 50,
            restart_inactive_service: true,
            service_manager: "systemctl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct MonitorSettings {
    #[serde(with = "humantime_serde")]
    pub(crate) check_interval: Duration,
    pub(crate) failure_threshold: u32,
    pub(crate) report_every_ticks: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_threshold: 3,
            report_every_ticks: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RecoverySettings {
    pub(crate) max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub(crate) base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) settle_time: Duration,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(10),
            settle_time: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct OutageSettings {
    pub(crate) max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub(crate) base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) delay_step: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) grace_period: Duration,
}

impl Default for OutageSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(30),
            delay_step: Duration::from_secs(10),
            grace_period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ReportingSettings {
    pub(crate) report_dir: PathBuf,
    pub(crate) history_path: PathBuf,
    pub(crate) history_limit: usize,
    #[serde(with = "humantime_serde")]
    pub(crate) window: Duration,
    pub(crate) output_to_console: bool,
    pub(crate) reconnect_warning_threshold: u64,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("/tmp/tunnelwatch"),
            history_path: PathBuf::from("/tmp/tunnelwatch/checks.jsonl"),
            history_limit: 10,
            window: Duration::from_secs(24 * 60 * 60),
            output_to_console: true,
            reconnect_warning_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct AlertingSettings {
    pub(crate) webhook_url: Option<String>,
    pub(crate) email_to: Option<String>,
    pub(crate) email_program: String,
    pub(crate) desktop: bool,
    pub(crate) desktop_program: String,
    pub(crate) user_agent: String,
}

impl Default for AlertingSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            email_to: None,
            email_program: "mail".to_string(),
            desktop: false,
            desktop_program: "notify-send".to_string(),
            user_agent: concat!("tunnelwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) tunnel: TunnelSettings,
    pub(crate) shell: ShellSettings,
    pub(crate) probes: ProbeSettings,
    pub(crate) monitor: MonitorSettings,
    pub(crate) recovery: RecoverySettings,
    pub(crate) outage: OutageSettings,
    pub(crate) reporting: ReportingSettings,
    pub(crate) alerting: AlertingSettings,
}

impl Settings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.monitor.failure_threshold == 0 {
            anyhow::bail!("monitor.failure_threshold must be at least 1");
        }
        if self.monitor.check_interval.is_zero() {
            anyhow::bail!("monitor.check_interval must be greater than zero");
        }
        if self.monitor.report_every_ticks == 0 {
            anyhow::bail!("monitor.report_every_ticks must be at least 1");
        }
        if self.recovery.max_attempts == 0 {
            anyhow::bail!("recovery.max_attempts must be at least 1");
        }
        if self.outage.max_attempts == 0 {
            anyhow::bail!("outage.max_attempts must be at least 1");
        }
        if self.probes.reference_hosts.is_empty() {
            anyhow::bail!("probes.reference_hosts must list at least one host");
        }
        if self.probes.network_timeout < Duration::from_secs(1) {
            anyhow::bail!("probes.network_timeout must be at least 1s");
        }
        if self.probes.min_network_percent > 100 {
            anyhow::bail!("probes.min_network_percent must be between 0 and 100");
        }
        Regex::new(&self.tunnel.hostname_pattern).with_context(|| {
            format!(
                "tunnel.hostname_pattern is not a valid regex: {}",
                self.tunnel.hostname_pattern
            )
        })?;
        if let Some(webhook) = self.webhook_url() {
            Url::parse(webhook)
                .with_context(|| format!("alerting.webhook_url is not a valid URL: {}", webhook))?;
        }
        Ok(())
    }

    /// Configured webhook, treating an empty string as unset.
    pub(crate) fn webhook_url(&self) -> Option<&str> {
        self.alerting
            .webhook_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub(crate) fn email_to(&self) -> Option<&str> {
        self.alerting
            .email_to
            .as_deref()
            .filter(|to| !to.trim().is_empty())
    }
}

pub(crate) fn load_settings(path: Option<&str>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::with_name(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
    };
    let settings: Settings = Config::builder()
        .add_source(file)
        .add_source(config::Environment::with_prefix("TUNNELWATCH").separator("__"))
        .build()?
        .try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

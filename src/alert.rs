use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::join;
use rand::{Rng, rng};
use reqwest::Client;
use serde::Serialize;
use tokio::time;
use tracing::{error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::ports::{AlertSink, CommandRunner};

const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
const WEBHOOK_BACKOFF: Duration = Duration::from_secs(1);
const CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Alert {
    pub(crate) subject: String,
    pub(crate) message: String,
    pub(crate) timestamp: DateTime<Utc>,
}

impl Alert {
    pub(crate) fn fatal(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Fans alerts out to every configured channel. Unconfigured channels are
/// skipped; with none configured an alert is only logged.
pub(crate) struct Alerter<R> {
    runner: R,
    client: Client,
    webhook_url: Option<String>,
    email_to: Option<String>,
    email_program: String,
    desktop_program: Option<String>,
}

impl<R: CommandRunner> Alerter<R> {
    pub(crate) fn new(runner: R, settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.alerting.user_agent)
            .timeout(CHANNEL_TIMEOUT)
            .build()?;
        Ok(Self {
            runner,
            client,
            webhook_url: settings.webhook_url().map(str::to_string),
            email_to: settings.email_to().map(str::to_string),
            email_program: settings.alerting.email_program.clone(),
            desktop_program: settings
                .alerting
                .desktop
                .then(|| settings.alerting.desktop_program.clone()),
        })
    }

    async fn send_email(&self, to: &str, alert: &Alert) -> Result<()> {
        let subject = format!("[tunnelwatch] {}", alert.subject);
        let body = format!("{}\n\nat {}\n", alert.message, alert.timestamp.to_rfc3339());
        let output = self
            .runner
            .run_with_stdin(
                &self.email_program,
                &["-s", &subject, to],
                body.as_bytes(),
                CHANNEL_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            anyhow::bail!("{} exited with {}", self.email_program, output.status);
        }
        Ok(())
    }

    async fn send_desktop(&self, program: &str, alert: &Alert) -> Result<()> {
        let output = self
            .runner
            .run(
                program,
                &["-u", "critical", &alert.subject, &alert.message],
                CHANNEL_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            anyhow::bail!("{} exited with {}", program, output.status);
        }
        Ok(())
    }
}

impl<R: CommandRunner> AlertSink for Alerter<R> {
    async fn dispatch(&self, alert: &Alert) {
        error!(subject = %alert.subject, "{}", alert.message);

        let webhook = async {
            if let Some(url) = &self.webhook_url {
                if let Err(e) = post_webhook(&self.client, url, alert, WEBHOOK_BACKOFF).await {
                    warn!(error = %e, "webhook alert failed");
                }
            }
        };
        let email = async {
            if let Some(to) = &self.email_to {
                if let Err(e) = self.send_email(to, alert).await {
                    warn!(error = %e, "email alert failed");
                }
            }
        };
        let desktop = async {
            if let Some(program) = &self.desktop_program {
                if let Err(e) = self.send_desktop(program, alert).await {
                    warn!(error = %e, "desktop alert failed");
                }
            }
        };
        join!(webhook, email, desktop);
    }
}

/// POST `alert` as JSON, retrying server errors and transport failures with
/// doubling delays that start at `backoff`. A 4xx answer is final.
pub(crate) async fn post_webhook(
    client: &Client,
    url: &str,
    alert: &Alert,
    backoff: Duration,
) -> Result<()> {
    let url = Url::parse(url)?;
    let jitter_cap = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX).max(1);

    let mut attempts = 0;
    let mut delay = backoff;

    loop {
        attempts += 1;
        let response = client.post(url.clone()).json(alert).send().await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(subject = %alert.subject, "alert delivered to webhook");
                return Ok(());
            }
            Ok(resp) => {
                let status = resp.status();
                let error_text = resp.text().await.unwrap_or_else(|_| "No body".to_string());
                if status.is_client_error() {
                    anyhow::bail!("webhook rejected alert: {} - {}", status, error_text);
                }
                warn!(attempt = attempts, %status, "webhook returned {}", error_text);
            }
            Err(e) => {
                warn!(attempt = attempts, error = %e, "webhook request failed");
            }
        }

        if attempts >= WEBHOOK_MAX_ATTEMPTS {
            anyhow::bail!(
                "failed to deliver alert to webhook after {} attempts",
                WEBHOOK_MAX_ATTEMPTS
            );
        }

        time::sleep(delay).await;
        let jitter_ms: u64 = rng().random_range(0..jitter_cap);
        delay = delay
            .saturating_mul(2)
            .saturating_add(Duration::from_millis(jitter_ms));
    }
}

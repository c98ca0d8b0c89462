use anyhow::Result;
use regex::Regex;

use crate::alert::Alert;
use crate::config::Settings;
use crate::models::MonitorState;
use crate::ports::AlertSink;

/// Read-only collaborators shared by the evaluator, the controllers and the
/// monitor loop. Mutable state travels separately as `&mut MonitorState`.
pub(crate) struct Context<'a, H, A> {
    pub(crate) settings: &'a Settings,
    pub(crate) host: &'a H,
    pub(crate) alerts: &'a A,
    pub(crate) hostname_pattern: Regex,
}

impl<'a, H, A: AlertSink> Context<'a, H, A> {
    pub(crate) fn new(settings: &'a Settings, host: &'a H, alerts: &'a A) -> Result<Self> {
        Ok(Self {
            settings,
            host,
            alerts,
            hostname_pattern: Regex::new(&settings.tunnel.hostname_pattern)?,
        })
    }

    pub(crate) async fn raise_fatal(
        &self,
        state: &mut MonitorState,
        subject: &str,
        message: String,
    ) {
        state.metrics.fatal_alerts += 1;
        self.alerts.dispatch(&Alert::fatal(subject, message)).await;
    }
}

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use colored::*;
use statistical::{mean, median};
use tracing::info;

use crate::config::Settings;
use crate::models::{CheckRecord, HealthChecks, HealthStatus, MonitorState};
use crate::storage::{load_check_records, write_report_file};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Aggregate over persisted check records in a time window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HistorySummary {
    pub(crate) since: DateTime<Utc>,
    pub(crate) until: DateTime<Utc>,
    pub(crate) samples: usize,
    pub(crate) healthy: usize,
    pub(crate) uptime: f64,
    pub(crate) mean_health: f64,
    pub(crate) median_health: f64,
}

pub(crate) fn summarize_history(
    records: &[CheckRecord],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> HistorySummary {
    let samples = records.len();
    let healthy = records
        .iter()
        .filter(|r| r.status == HealthStatus::Healthy)
        .count();
    let health: Vec<f64> = records
        .iter()
        .map(|r| f64::from(r.health_percentage))
        .collect();
    let (uptime, mean_health, median_health) = if samples > 0 {
        (
            healthy as f64 / samples as f64 * 100.0,
            mean(&health),
            median(&health),
        )
    } else {
        (0.0, 0.0, 0.0)
    };
    HistorySummary {
        since,
        until,
        samples,
        healthy,
        uptime,
        mean_health,
        median_health,
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn local(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn whole_seconds(d: ChronoDuration) -> std::time::Duration {
    std::time::Duration::from_secs(d.num_seconds().max(0) as u64)
}

/// Actionable hints derived from the current state and configured thresholds.
pub(crate) fn recommendations(state: &MonitorState, settings: &Settings) -> Vec<String> {
    let tunnel = &state.tunnel;
    let metrics = &state.metrics;
    if metrics.total_checks == 0 {
        return vec!["No health checks recorded yet; run `tunnelwatch health-check`.".to_string()];
    }

    let mut recs = Vec::new();
    if !tunnel.config_valid {
        recs.push(format!(
            "Tunnel identity file {} is missing or invalid; tunnel probes are disabled until it is fixed.",
            settings.tunnel.identity_file.display()
        ));
    }
    if !tunnel.service_running {
        recs.push(format!(
            "Tunnel client service '{}' is not running; inspect `{} status {}`.",
            settings.tunnel.service, settings.probes.service_manager, settings.tunnel.service
        ));
    }
    match tunnel.network_connectivity_pct {
        0 if tunnel.reachable_hosts == 0 => recs.push(
            "No reference host is reachable; check the machine's internet connection.".to_string(),
        ),
        pct if pct < 100 => recs.push(format!(
            "Partial network loss: only {}% of reference hosts reachable.",
            pct
        )),
        _ => {}
    }
    if tunnel.config_valid && !tunnel.info_accessible {
        recs.push(
            "Tunnel client cannot report tunnel info; verify its credentials and connectivity."
                .to_string(),
        );
    }
    match &tunnel.hostname {
        None if tunnel.config_valid => {
            recs.push("Public hostname could not be discovered.".to_string())
        }
        Some(hostname) if !tunnel.http_accessible => recs.push(format!(
            "Public hostname {} does not answer HTTP requests.",
            hostname
        )),
        _ => {}
    }
    if !tunnel.shell_running {
        recs.push(format!(
            "Local shell service '{}' is not accepting connections on port {}.",
            settings.shell.service, settings.shell.port
        ));
    }
    if tunnel.consecutive_failures >= settings.monitor.failure_threshold {
        recs.push(format!(
            "{} consecutive failed checks: at or above the recovery threshold of {}.",
            tunnel.consecutive_failures, settings.monitor.failure_threshold
        ));
    }
    if metrics.reconnections >= settings.reporting.reconnect_warning_threshold {
        recs.push(format!(
            "{} reconnections so far; review the tunnel client log for recurring drops.",
            metrics.reconnections
        ));
    }
    if metrics.success_rate() < 95 {
        recs.push(format!(
            "Check success rate is {}%, below the 95% target.",
            metrics.success_rate()
        ));
    }
    if metrics.fatal_alerts > 0 {
        recs.push(format!(
            "{} recovery sequence(s) exhausted; manual intervention was requested.",
            metrics.fatal_alerts
        ));
    }
    if recs.is_empty() {
        recs.push("No action needed; the tunnel is operating normally.".to_string());
    }
    recs
}

/// Plain-text report. Pure: the same inputs always render the same text.
pub(crate) fn render_report(
    state: &MonitorState,
    settings: &Settings,
    history: &HistorySummary,
    generated_at: DateTime<Utc>,
) -> String {
    let tunnel = &state.tunnel;
    let metrics = &state.metrics;
    let mut out = String::new();

    // writing into a String cannot fail
    let _ = writeln!(out, "Tunnel Reliability Report");
    let _ = writeln!(out, "=========================");
    let _ = writeln!(out, "Generated:            {}", local(Some(generated_at)));
    let _ = writeln!(out, "Monitoring since:     {}", local(Some(metrics.uptime_start)));
    let _ = writeln!(
        out,
        "Monitor uptime:       {}",
        humantime::format_duration(whole_seconds(generated_at - metrics.uptime_start))
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Current state");
    let _ = writeln!(out, "-------------");
    let _ = writeln!(out, "Status:               {}", tunnel.status);
    let _ = writeln!(
        out,
        "Health score:         {}/{} ({}%)",
        tunnel.health_score,
        HealthChecks::TOTAL,
        tunnel.health_percentage
    );
    let _ = writeln!(out, "Consecutive failures: {}", tunnel.consecutive_failures);
    let _ = writeln!(out, "Last check:           {}", local(tunnel.last_check_at));
    let _ = writeln!(out, "Last success:         {}", local(tunnel.last_success_at));
    let _ = writeln!(
        out,
        "Tunnel ID:            {}",
        tunnel.tunnel_id.as_deref().unwrap_or("unknown")
    );
    let _ = writeln!(
        out,
        "Hostname:             {}",
        tunnel.hostname.as_deref().unwrap_or("unknown")
    );
    let _ = writeln!(out, "Network connectivity: {}%", tunnel.network_connectivity_pct);
    let _ = writeln!(out, "Reconnect count:      {}", tunnel.reconnect_count);
    let _ = writeln!(out);

    let _ = writeln!(out, "Checks");
    let _ = writeln!(out, "------");
    let _ = writeln!(out, "Tunnel service running: {}", yes_no(tunnel.service_running));
    let _ = writeln!(out, "Network connectivity:   {}", yes_no(tunnel.network_ok));
    let _ = writeln!(out, "Tunnel config valid:    {}", yes_no(tunnel.config_valid));
    let _ = writeln!(out, "Tunnel info accessible: {}", yes_no(tunnel.info_accessible));
    let _ = writeln!(out, "Tunnel HTTP reachable:  {}", yes_no(tunnel.http_accessible));
    let _ = writeln!(out, "Local shell running:    {}", yes_no(tunnel.shell_running));
    if let Some(err) = &tunnel.config_error {
        let _ = writeln!(out, "Config error:           {}", err);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Metrics");
    let _ = writeln!(out, "-------");
    let _ = writeln!(out, "Total checks:          {}", metrics.total_checks);
    let _ = writeln!(out, "Successful checks:     {}", metrics.successful_checks);
    let _ = writeln!(out, "Degraded checks:       {}", metrics.degraded_checks);
    let _ = writeln!(out, "Failed checks:         {}", metrics.failed_checks);
    let _ = writeln!(out, "Success rate:          {}%", metrics.success_rate());
    let _ = writeln!(out, "Reconnections:         {}", metrics.reconnections);
    let _ = writeln!(out, "Network interruptions: {}", metrics.network_interruptions);
    let _ = writeln!(out, "Fatal alerts:          {}", metrics.fatal_alerts);
    let _ = writeln!(out);

    let _ = writeln!(out, "Last stability test");
    let _ = writeln!(out, "-------------------");
    match &metrics.last_stability {
        Some(s) => {
            let _ = writeln!(
                out,
                "Duration: {}, samples: {}, success rate: {}% ({})",
                humantime::format_duration(s.duration),
                s.sample_count,
                s.success_rate,
                s.tier
            );
        }
        None => {
            let _ = writeln!(out, "not run");
        }
    }
    let _ = writeln!(out);

    let limit = settings.reporting.history_limit;
    let _ = writeln!(
        out,
        "Recent reconnections (last {} of {})",
        limit,
        state.history.len()
    );
    let _ = writeln!(out, "-----------------------------");
    let recent = state.history.tail(limit);
    if recent.is_empty() {
        let _ = writeln!(out, "none");
    }
    for entry in recent {
        let _ = writeln!(out, "{}  {}", local(Some(entry.at)), entry.reason);
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Recorded history ({} ~ {})",
        local(Some(history.since)),
        local(Some(history.until))
    );
    let _ = writeln!(out, "----------------");
    if history.samples == 0 {
        let _ = writeln!(out, "no recorded checks in this period");
    } else {
        let _ = writeln!(
            out,
            "Samples: {}, healthy: {}, uptime: {:.3}%",
            history.samples, history.healthy, history.uptime
        );
        let _ = writeln!(
            out,
            "Health: mean {:.2}%, median {:.2}%",
            history.mean_health, history.median_health
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Recommendations");
    let _ = writeln!(out, "---------------");
    for rec in recommendations(state, settings) {
        let _ = writeln!(out, "- {}", rec);
    }
    out
}

pub(crate) fn report_file_name(generated_at: DateTime<Utc>) -> String {
    format!(
        "tunnel-report-{}.txt",
        generated_at.with_timezone(&Local).format("%Y%m%d-%H%M%S%.3f")
    )
}

fn colored_status(status: HealthStatus) -> ColoredString {
    match status {
        HealthStatus::Healthy => status.as_str().green(),
        HealthStatus::Degraded => status.as_str().yellow(),
        HealthStatus::Failed => status.as_str().red(),
        HealthStatus::Unknown => status.as_str().dimmed(),
    }
}

pub(crate) fn print_console_summary(state: &MonitorState) {
    let tunnel = &state.tunnel;
    let metrics = &state.metrics;

    let rate = metrics.success_rate();
    let rate_str = format!("{}%", rate);
    let rate_colored = if rate < 70 {
        rate_str.red()
    } else if rate < 95 {
        rate_str.yellow()
    } else {
        rate_str.green()
    };

    println!("Tunnel status: {}", colored_status(tunnel.status));
    println!("-----------------");
    println!(
        "  Score: {}/{}, consecutive failures: {}",
        tunnel.health_score,
        HealthChecks::TOTAL,
        tunnel.consecutive_failures
    );
    println!(
        "  Hostname: {}",
        tunnel.hostname.as_deref().unwrap_or("unknown").bold()
    );
    println!(
        "  Checks: {} total, success rate {}",
        metrics.total_checks, rate_colored
    );
    println!(
        "  Reconnections: {}, network interruptions: {}",
        metrics.reconnections, metrics.network_interruptions
    );
}

/// Render the current state plus persisted history for `[since, until]` and
/// write it to the report directory. Never mutates `state`.
pub(crate) async fn generate_report(
    settings: &Settings,
    state: &MonitorState,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<PathBuf> {
    let generated_at = Utc::now();
    let until = until.unwrap_or(generated_at);
    let since = match since {
        Some(s) => s,
        None => {
            let window = ChronoDuration::from_std(settings.reporting.window)
                .map_err(|_| anyhow::anyhow!("Reporting window setting is invalid or too large"))?;
            until - window
        }
    };

    if since > until {
        anyhow::bail!(
            "--since ({}) must be earlier than or equal to --until ({})",
            since,
            until
        );
    }

    let records = load_check_records(&settings.reporting.history_path, Some(since), Some(until))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not load check history");
            Vec::new()
        });
    let history = summarize_history(&records, since, until);
    let text = render_report(state, settings, &history, generated_at);
    let path = write_report_file(
        &settings.reporting.report_dir,
        &report_file_name(generated_at),
        text,
    )
    .await?;
    info!(path = %path.display(), "report written");

    if settings.reporting.output_to_console {
        print_console_summary(state);
        println!("  Report: {}", path.display());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{StabilitySummary, StabilityTier};
    use crate::testing::test_settings;

    fn sample_state() -> MonitorState {
        let mut state = MonitorState::new();
        state.tunnel.status = HealthStatus::Degraded;
        state.tunnel.health_score = 3;
        state.tunnel.health_percentage = 75;
        state.tunnel.tunnel_id = Some("6ff42ae2".to_string());
        state.tunnel.hostname = Some("agent-shell.example.com".to_string());
        state.tunnel.network_connectivity_pct = 66;
        state.tunnel.service_running = true;
        state.tunnel.network_ok = true;
        state.tunnel.config_valid = true;
        state.tunnel.info_accessible = true;
        state.tunnel.shell_running = true;
        state.metrics.total_checks = 10;
        state.metrics.successful_checks = 8;
        state.metrics.degraded_checks = 2;
        state.metrics.last_stability = Some(StabilitySummary {
            duration: std::time::Duration::from_secs(60),
            sample_count: 6,
            success_count: 6,
            success_rate: 100,
            tier: StabilityTier::Excellent,
        });
        for i in 0..12 {
            state.record_reconnect(&format!("reason-{i}"));
        }
        state
    }

    fn empty_history() -> HistorySummary {
        let now = Utc::now();
        summarize_history(&[], now - ChronoDuration::hours(1), now)
    }

    #[test]
    fn rendering_is_repeatable_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let state = sample_state();
        let at = Utc::now();
        let history = empty_history();

        let first = render_report(&state, &settings, &history, at);
        let second = render_report(&state, &settings, &history, at);
        assert_eq!(first, second);

        assert!(first.contains("Status:               degraded"));
        assert!(first.contains("Success rate:          80%"));
        assert!(first.contains("success rate: 100% (excellent)"));
        assert!(first.contains("reason-11"));
        assert!(first.contains("reason-2"));
        assert!(!first.contains("reason-1\n"));
        assert_eq!(state.metrics.total_checks, 10);
    }

    #[test]
    fn recommendations_follow_state() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let recs = recommendations(&sample_state(), &settings);
        assert!(recs.iter().any(|r| r.contains("Partial network loss: only 66%")));
        assert!(recs.iter().any(|r| r.contains("does not answer HTTP")));
        assert!(recs.iter().any(|r| r.contains("12 reconnections")));
        assert!(recs.iter().any(|r| r.contains("80%")));

        let fresh = recommendations(&MonitorState::new(), &settings);
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].contains("No health checks recorded"));
    }

    #[test]
    fn history_summary_uses_health_percentages() {
        let now = Utc::now();
        let records: Vec<CheckRecord> = [4u8, 4, 2, 4]
            .iter()
            .map(|&score| CheckRecord {
                timestamp: now,
                score,
                status: HealthStatus::from_score(score),
                health_percentage: score * 25,
                network_connectivity_pct: 100,
                issues: Vec::new(),
            })
            .collect();
        let summary = summarize_history(&records, now, now);
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.healthy, 3);
        assert!((summary.uptime - 75.0).abs() < f64::EPSILON);
        assert!((summary.mean_health - 87.5).abs() < 1e-9);
        assert!((summary.median_health - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn generate_twice_without_ticks_writes_identical_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.reporting.output_to_console = false;
        let state = sample_state();

        let until = Utc::now();
        let since = until - ChronoDuration::hours(1);
        let first = generate_report(&settings, &state, Some(since), Some(until))
            .await
            .unwrap();
        let first_text = std::fs::read_to_string(&first).unwrap();
        let second = generate_report(&settings, &state, Some(since), Some(until))
            .await
            .unwrap();
        let second_text = std::fs::read_to_string(&second).unwrap();

        // only the header timestamps may differ
        let body = |text: &str| {
            text.split_once("Current state")
                .map(|(_, rest)| rest.to_string())
                .unwrap()
        };
        assert_eq!(body(&first_text), body(&second_text));
    }

    #[tokio::test]
    async fn back_to_back_reports_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.reporting.output_to_console = false;
        let state = sample_state();

        let first = generate_report(&settings, &state, None, None).await.unwrap();
        let second = generate_report(&settings, &state, None, None).await.unwrap();

        assert_ne!(first, second);
        let files = std::fs::read_dir(&settings.reporting.report_dir)
            .unwrap()
            .count();
        assert_eq!(files, 2);
    }

    #[test]
    fn report_file_name_carries_milliseconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + ChronoDuration::milliseconds(42);
        let name = report_file_name(at);
        assert!(name.starts_with("tunnel-report-"));
        assert!(name.ends_with(".042.txt"), "{}", name);
    }

    #[tokio::test]
    async fn since_after_until_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let now = Utc::now();
        let err = generate_report(
            &settings,
            &MonitorState::new(),
            Some(now),
            Some(now - ChronoDuration::minutes(5)),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("must be earlier"));
    }
}

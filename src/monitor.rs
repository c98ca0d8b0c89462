//! Continuous monitor: periodic evaluation, sustained-failure detection and
//! periodic reporting until a duration elapses or a stop is requested.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::health::evaluate;
use crate::models::{CheckRecord, Evaluation, MonitorState};
use crate::ports::{AlertSink, TunnelHost};
use crate::recovery::{self, Resolution};
use crate::report::generate_report;
use crate::storage::append_check_record;

pub(crate) const HEALTH_FAILURE_REASON: &str = "health_check_failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Initializing,
    Running,
    Stopping,
}

#[derive(Debug)]
pub(crate) struct Tick {
    pub(crate) evaluation: Evaluation,
    /// Set when this tick crossed the failure threshold and a controller ran.
    pub(crate) resolution: Option<Resolution>,
}

pub(crate) struct Monitor<'a, H, A> {
    ctx: Context<'a, H, A>,
    state: MonitorState,
    phase: Phase,
}

impl<'a, H: TunnelHost, A: AlertSink> Monitor<'a, H, A> {
    pub(crate) fn new(ctx: Context<'a, H, A>, state: MonitorState) -> Self {
        Self {
            ctx,
            state,
            phase: Phase::Initializing,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn state(&self) -> &MonitorState {
        &self.state
    }

    /// One evaluation, persisted to the check history. Reaching the failure
    /// threshold hands off to the recovery or outage controller, after which
    /// the failure streak starts over.
    pub(crate) async fn tick(&mut self) -> Tick {
        let evaluation = evaluate(&self.ctx, &mut self.state).await;

        let record = CheckRecord::from_evaluation(
            &evaluation,
            self.state.tunnel.network_connectivity_pct,
        );
        if let Err(e) =
            append_check_record(&self.ctx.settings.reporting.history_path, &record).await
        {
            warn!(error = %e, "failed to persist check record");
        }

        let threshold = self.ctx.settings.monitor.failure_threshold;
        let failures = self.state.tunnel.consecutive_failures;
        if evaluation.is_healthy() || failures < threshold {
            return Tick {
                evaluation,
                resolution: None,
            };
        }

        warn!(failures, threshold, "failure threshold reached");
        let resolution =
            recovery::respond(&self.ctx, &mut self.state, HEALTH_FAILURE_REASON).await;
        if resolution.is_recovered() {
            info!(?resolution, "tunnel recovered");
        } else {
            error!(?resolution, "automatic recovery did not restore the tunnel");
        }
        self.state.tunnel.consecutive_failures = 0;
        Tick {
            evaluation,
            resolution: Some(resolution),
        }
    }

    async fn write_report(&self) {
        if let Err(e) = generate_report(self.ctx.settings, &self.state, None, None).await {
            error!(error = %e, "failed to write report");
        }
    }

    /// Tick every `interval` until `duration` (if any) has elapsed or `stop`
    /// turns true. A tick that is already running always completes. Writes a
    /// report every `report_every_ticks` ticks and a final one on exit.
    pub(crate) async fn run(
        &mut self,
        duration: Option<Duration>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        self.phase = Phase::Running;
        let started = Instant::now();
        let report_every = self.ctx.settings.monitor.report_every_ticks;
        let mut listening = true;
        let mut ticks = 0u64;
        let mut responses = 0u64;
        info!(
            interval = %humantime::format_duration(interval),
            duration = %duration
                .map(|d| humantime::format_duration(d).to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            "monitor started"
        );

        loop {
            if *stop.borrow() {
                info!("stop requested");
                break;
            }
            if duration.is_some_and(|d| started.elapsed() >= d) {
                info!(ticks, "monitor duration reached");
                break;
            }

            let tick = self.tick().await;
            ticks += 1;
            debug!(tick = ticks, status = %tick.evaluation.status, "tick finished");
            if tick.resolution.is_some() {
                responses += 1;
            }
            if ticks % report_every == 0 {
                self.write_report().await;
            }

            let pause = duration.map_or(interval, |d| {
                interval.min(d.saturating_sub(started.elapsed()))
            });
            let sleep = time::sleep(pause);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    changed = stop.changed(), if listening => match changed {
                        Ok(()) if *stop.borrow() => break,
                        Ok(()) => {}
                        // no sender left, nobody can ask us to stop any more
                        Err(_) => listening = false,
                    },
                }
            }
        }

        self.phase = Phase::Stopping;
        self.write_report().await;
        info!(
            ticks,
            responses,
            total_checks = self.state.metrics.total_checks,
            success_rate = self.state.metrics.success_rate(),
            "monitor stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthStatus;
    use crate::outage::OutageOutcome;
    use crate::recovery::RecoveryOutcome;
    use crate::storage::load_check_records;
    use crate::testing::{FakeHost, RecordingAlerts, test_settings};

    #[tokio::test(start_paused = true)]
    async fn response_fires_once_per_threshold_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.recovery.max_attempts = 1;
        let host = FakeHost::healthy();
        host.update(|w| w.http_status = None);
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());

        let mut fired = Vec::new();
        for n in 1..=6 {
            let tick = monitor.tick().await;
            assert_eq!(tick.evaluation.status, HealthStatus::Degraded);
            if let Some(resolution) = tick.resolution {
                assert_eq!(
                    resolution,
                    Resolution::Recovery(RecoveryOutcome::Exhausted { attempts: 1 })
                );
                fired.push(n);
            }
        }

        assert_eq!(fired, vec![3, 6]);
        assert_eq!(monitor.state().tunnel.reconnect_count, 2);
        assert_eq!(alerts.subjects().len(), 2);
        assert_eq!(monitor.state().tunnel.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn total_network_loss_goes_to_outage_handler() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.monitor.failure_threshold = 1;
        let host = FakeHost::healthy();
        // evaluation and first outage probe see nothing, then the network returns
        host.update(|w| w.network_script.extend([0, 0]));
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());

        let tick = monitor.tick().await;

        assert_eq!(
            tick.resolution,
            Some(Resolution::Outage(OutageOutcome::SelfHealed))
        );
        assert_eq!(monitor.state().metrics.network_interruptions, 1);
        assert_eq!(monitor.state().tunnel.reconnect_count, 0);
        assert_eq!(host.world().starts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_ticks_on_schedule_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.monitor.report_every_ticks = 4;
        settings.reporting.output_to_console = false;
        let host = FakeHost::healthy();
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());
        assert_eq!(monitor.phase(), Phase::Initializing);
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        monitor
            .run(Some(Duration::from_secs(60)), Duration::from_secs(10), rx)
            .await;

        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(monitor.phase(), Phase::Stopping);
        assert_eq!(monitor.state().metrics.total_checks, 6);
        let history = load_check_records(&settings.reporting.history_path, None, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 6);
        assert!(settings.reporting.report_dir.is_dir());
    }

    #[tokio::test(start_paused = true)]
    async fn last_pause_is_cut_to_the_remaining_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.reporting.output_to_console = false;
        let host = FakeHost::healthy();
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());
        let (_tx, rx) = watch::channel(false);

        let started = Instant::now();
        monitor
            .run(Some(Duration::from_secs(45)), Duration::from_secs(30), rx)
            .await;

        assert_eq!(started.elapsed(), Duration::from_secs(45));
        assert_eq!(monitor.state().metrics.total_checks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_ends_the_loop_between_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.reporting.output_to_console = false;
        let host = FakeHost::healthy();
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());
        let (tx, rx) = watch::channel(false);

        let started = Instant::now();
        let stopper = async {
            time::sleep(Duration::from_secs(25)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(monitor.run(None, Duration::from_secs(10), rx), stopper);

        assert_eq!(started.elapsed(), Duration::from_secs(25));
        assert_eq!(monitor.state().metrics.total_checks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_sender_does_not_end_or_spin_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.reporting.output_to_console = false;
        let host = FakeHost::healthy();
        let alerts = RecordingAlerts::default();
        let ctx = Context::new(&settings, &host, &alerts).unwrap();
        let mut monitor = Monitor::new(ctx, MonitorState::new());
        let (tx, rx) = watch::channel(false);
        drop(tx);

        let started = Instant::now();
        monitor
            .run(Some(Duration::from_secs(30)), Duration::from_secs(10), rx)
            .await;

        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(monitor.state().metrics.total_checks, 3);
    }
}

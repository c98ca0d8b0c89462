//! Stability tester: samples the health evaluator on a fixed cadence and
//! grades the success rate. Passive; it never triggers recovery.

use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::context::Context;
use crate::health::evaluate;
use crate::models::{MonitorState, StabilitySummary, StabilityTier};
use crate::ports::TunnelHost;

/// Sample every `interval` until `duration` has elapsed. A sample is only
/// started while elapsed time is strictly below `duration`, so 60s at 10s
/// yields exactly six samples.
pub(crate) async fn run<H: TunnelHost, A>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
    duration: Duration,
    interval: Duration,
) -> StabilitySummary {
    info!(
        duration = %humantime::format_duration(duration),
        interval = %humantime::format_duration(interval),
        "starting stability test"
    );

    let started = Instant::now();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sample_count = 0u64;
    let mut success_count = 0u64;
    loop {
        ticker.tick().await;
        if started.elapsed() >= duration {
            break;
        }
        sample_count += 1;
        let evaluation = evaluate(ctx, state).await;
        if evaluation.is_healthy() {
            success_count += 1;
        }
        info!(
            sample = sample_count,
            status = %evaluation.status,
            score = evaluation.score,
            "stability sample"
        );
    }

    let success_rate = success_rate(success_count, sample_count);
    let summary = StabilitySummary {
        duration,
        sample_count,
        success_count,
        success_rate,
        tier: StabilityTier::from_rate(success_rate),
    };
    info!(
        samples = sample_count,
        successes = success_count,
        success_rate,
        tier = %summary.tier,
        "stability test finished"
    );
    state.metrics.last_stability = Some(summary.clone());
    summary
}

/// Integer percentage, truncated.
pub(crate) fn success_rate(successes: u64, samples: u64) -> u8 {
    if samples == 0 {
        return 0;
    }
    (successes * 100 / samples) as u8
}

//! Network-outage handler: waits out a total loss of connectivity, then
//! decides whether the tunnel healed by itself or needs a restart.

use tokio::time;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::health::evaluate;
use crate::models::MonitorState;
use crate::ports::{AlertSink, TunnelHost};
use crate::probe;
use crate::recovery::{NETWORK_RECOVERY_REASON, RecoveryOutcome, reconnect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutageOutcome {
    /// Network came back and the tunnel was healthy without intervention.
    SelfHealed,
    /// Network came back and a tunnel restart fixed it.
    Reconnected,
    /// Network came back but the recovery controller gave up (and alerted).
    RecoveryExhausted,
    /// Network never came back within the attempt budget.
    Exhausted,
}

/// Handle one outage episode. Attempt `n` first waits
/// `base_delay + delay_step * (n - 1)`.
pub(crate) async fn handle<H: TunnelHost, A: AlertSink>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
) -> OutageOutcome {
    let settings = &ctx.settings.outage;
    let probes = &ctx.settings.probes;
    state.metrics.network_interruptions += 1;
    warn!(
        interruptions = state.metrics.network_interruptions,
        "network outage detected"
    );

    for attempt in 1..=settings.max_attempts {
        let delay = settings
            .base_delay
            .saturating_add(settings.delay_step.saturating_mul(attempt - 1));
        info!(
            attempt,
            delay = %humantime::format_duration(delay),
            "waiting for network to return"
        );
        time::sleep(delay).await;

        let reach = probe::network(ctx.host, &probes.reference_hosts, probes.network_timeout).await;
        state.tunnel.network_connectivity_pct = reach.percent();
        state.tunnel.reachable_hosts = reach.reachable;
        if reach.is_total_loss() {
            warn!(attempt, "network still unreachable");
            continue;
        }

        info!(
            attempt,
            reachable = reach.reachable,
            total = reach.total,
            "network restored"
        );
        time::sleep(settings.grace_period).await;
        if evaluate(ctx, state).await.is_healthy() {
            info!("tunnel self-healed after network outage");
            return OutageOutcome::SelfHealed;
        }

        match reconnect(ctx, state, NETWORK_RECOVERY_REASON).await {
            RecoveryOutcome::Recovered { .. } => return OutageOutcome::Reconnected,
            RecoveryOutcome::Exhausted { .. } => return OutageOutcome::RecoveryExhausted,
            RecoveryOutcome::NetworkLost { .. } => {
                warn!(attempt, "network dropped again during recovery");
            }
        }
    }

    error!(max_attempts = settings.max_attempts, "network recovery exhausted");
    ctx.raise_fatal(
        state,
        "Network recovery failed",
        format!(
            "network recovery failed after {} attempts - manual intervention required",
            settings.max_attempts
        ),
    )
    .await;
    OutageOutcome::Exhausted
}

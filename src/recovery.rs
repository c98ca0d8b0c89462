//! Recovery controller: bounded tunnel restarts with linearly growing delay.

use anyhow::Result;
use tokio::time;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::health::evaluate;
use crate::models::MonitorState;
use crate::outage::{self, OutageOutcome};
use crate::ports::{AlertSink, ServiceManager, TunnelHost};
use crate::probe;

pub(crate) const NETWORK_RECOVERY_REASON: &str = "network_recovery";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecoveryOutcome {
    Recovered { attempts: u32 },
    Exhausted { attempts: u32 },
    /// Every reference host went dark mid-recovery; the outage handler owns it now.
    NetworkLost { attempts: u32 },
}

/// Final result of reacting to a failure, whichever controller handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Recovery(RecoveryOutcome),
    Outage(OutageOutcome),
}

impl Resolution {
    pub(crate) fn is_recovered(self) -> bool {
        matches!(
            self,
            Resolution::Recovery(RecoveryOutcome::Recovered { .. })
                | Resolution::Outage(OutageOutcome::SelfHealed | OutageOutcome::Reconnected)
        )
    }
}

/// Pick the controller for a sustained failure: total network loss goes to
/// the outage handler, everything else to the recovery controller.
pub(crate) async fn respond<H: TunnelHost, A: AlertSink>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
    reason: &str,
) -> Resolution {
    if state.tunnel.reachable_hosts == 0 {
        warn!("no reference host reachable, treating as network outage");
        return Resolution::Outage(outage::handle(ctx, state).await);
    }
    force(ctx, state, reason).await
}

/// Run the recovery controller regardless of the last evaluation, handing
/// over to the outage handler if the network drops while it works.
pub(crate) async fn force<H: TunnelHost, A: AlertSink>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
    reason: &str,
) -> Resolution {
    match reconnect(ctx, state, reason).await {
        RecoveryOutcome::NetworkLost { .. } => {
            Resolution::Outage(outage::handle(ctx, state).await)
        }
        outcome => Resolution::Recovery(outcome),
    }
}

/// Restart the tunnel client until it evaluates healthy or the attempt
/// budget runs out. Attempt `n` first waits `base_delay * (n - 1)`.
pub(crate) async fn reconnect<H: TunnelHost, A: AlertSink>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
    reason: &str,
) -> RecoveryOutcome {
    let settings = &ctx.settings.recovery;
    let probes = &ctx.settings.probes;
    let max_attempts = settings.max_attempts;
    info!(reason, max_attempts, "starting tunnel recovery");

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = settings.base_delay.saturating_mul(attempt - 1);
            info!(
                attempt,
                delay = %humantime::format_duration(delay),
                "waiting before next reconnection attempt"
            );
            time::sleep(delay).await;
        }

        let reach = probe::network(ctx.host, &probes.reference_hosts, probes.network_timeout).await;
        state.tunnel.network_connectivity_pct = reach.percent();
        state.tunnel.reachable_hosts = reach.reachable;
        if reach.is_total_loss() {
            warn!(attempt, "network lost during recovery, handing over to outage handler");
            return RecoveryOutcome::NetworkLost {
                attempts: attempt - 1,
            };
        }

        state.record_reconnect(reason);
        let restarted =
            restart_service(ctx.host, &ctx.settings.tunnel.service, probes.service_timeout).await;
        if let Err(e) = restarted {
            warn!(attempt, error = %e, "tunnel restart failed");
            continue;
        }

        time::sleep(settings.settle_time).await;
        let evaluation = evaluate(ctx, state).await;
        if evaluation.is_healthy() {
            info!(attempt, reason, "tunnel recovered");
            return RecoveryOutcome::Recovered { attempts: attempt };
        }
        warn!(
            attempt,
            score = evaluation.score,
            issues = %evaluation.issues.join(", "),
            "tunnel still unhealthy after restart"
        );
    }

    error!(max_attempts, reason, "tunnel recovery exhausted");
    ctx.raise_fatal(
        state,
        "Tunnel reconnection failed",
        format!(
            "reconnection failed after {} attempts - manual intervention required (reason: {})",
            max_attempts, reason
        ),
    )
    .await;
    RecoveryOutcome::Exhausted {
        attempts: max_attempts,
    }
}

/// Stop the service if it is running, then start it.
async fn restart_service<S: ServiceManager>(
    services: &S,
    name: &str,
    timeout: std::time::Duration,
) -> Result<()> {
    let active = time::timeout(timeout, services.is_active(name))
        .await
        .map_err(|_| anyhow::anyhow!("status query for {} timed out", name))??;
    if active {
        time::timeout(timeout, services.stop(name))
            .await
            .map_err(|_| anyhow::anyhow!("stopping {} timed out", name))??;
    }
    time::timeout(timeout, services.start(name))
        .await
        .map_err(|_| anyhow::anyhow!("starting {} timed out", name))??;
    Ok(())
}

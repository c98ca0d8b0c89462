//! Health evaluator: four weighted checks folded into one score.

use chrono::Utc;
use tracing::{info, warn};

use crate::context::Context;
use crate::identity::load_identity;
use crate::models::{Evaluation, HealthChecks, HealthStatus, MonitorState, percentage};
use crate::ports::TunnelHost;
use crate::probe;

/// Run every probe in order (service, network, tunnel, local shell), fold the
/// results into `state` and count the check once in the metrics.
pub(crate) async fn evaluate<H: TunnelHost, A>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
) -> Evaluation {
    let settings = ctx.settings;
    let probes = &settings.probes;
    let now = Utc::now();

    let service_running = probe::service_running(
        ctx.host,
        &settings.tunnel.service,
        probes.restart_inactive_service,
        probes.service_timeout,
    )
    .await;

    let reach = probe::network(ctx.host, &probes.reference_hosts, probes.network_timeout).await;
    let network_pct = reach.percent();
    let network_ok = !reach.is_total_loss() && network_pct >= probes.min_network_percent;

    let tunnel = &mut state.tunnel;
    match load_identity(&settings.tunnel.identity_file).await {
        Ok(identity) => {
            tunnel.config_valid = true;
            tunnel.config_error = None;
            let info =
                probe::tunnel_info(ctx.host, &identity.tunnel_id, probes.info_timeout).await;
            tunnel.info_accessible = info.is_some();
            tunnel.hostname = probe::discover_hostname(
                ctx.host,
                info.as_ref(),
                &ctx.hostname_pattern,
                settings.tunnel.log_lines,
                identity.hostname.as_deref(),
                probes.info_timeout,
            )
            .await;
            tunnel.tunnel_id = Some(identity.tunnel_id);
        }
        Err(e) => {
            warn!(error = %e, "tunnel identity unusable");
            tunnel.config_valid = false;
            tunnel.config_error = Some(e.to_string());
            tunnel.info_accessible = false;
            tunnel.hostname = None;
            tunnel.tunnel_id = None;
        }
    }
    tunnel.http_accessible = match tunnel.hostname.as_deref() {
        Some(hostname) => probe::tunnel_http(ctx.host, hostname, probes.http_timeout).await,
        None => false,
    };

    let shell_running = probe::local_service(
        ctx.host,
        &settings.shell.service,
        settings.shell.port,
        probes.service_timeout,
    )
    .await;

    let checks = HealthChecks {
        service_running,
        network_connectivity: network_ok,
        tunnel_connectivity: tunnel.config_valid
            && tunnel.info_accessible
            && tunnel.http_accessible,
        shell_running,
    };
    let score = checks.score();
    let status = HealthStatus::from_score(score);
    let mut issues = checks.failing();
    if let Some(err) = &tunnel.config_error {
        issues.push(err.clone());
    }

    tunnel.status = status;
    tunnel.last_check_at = Some(now);
    tunnel.health_score = score;
    tunnel.health_percentage = percentage(score, HealthChecks::TOTAL);
    tunnel.network_connectivity_pct = network_pct;
    tunnel.reachable_hosts = reach.reachable;
    tunnel.service_running = service_running;
    tunnel.network_ok = network_ok;
    tunnel.shell_running = shell_running;

    let metrics = &mut state.metrics;
    metrics.total_checks += 1;
    match status {
        HealthStatus::Healthy => {
            tunnel.consecutive_failures = 0;
            tunnel.last_success_at = Some(now);
            metrics.successful_checks += 1;
            info!(score, "tunnel healthy");
        }
        HealthStatus::Degraded => {
            tunnel.consecutive_failures += 1;
            metrics.degraded_checks += 1;
            warn!(
                score,
                consecutive_failures = tunnel.consecutive_failures,
                issues = %issues.join(", "),
                "tunnel degraded"
            );
        }
        HealthStatus::Failed | HealthStatus::Unknown => {
            tunnel.consecutive_failures += 1;
            metrics.failed_checks += 1;
            warn!(
                score,
                consecutive_failures = tunnel.consecutive_failures,
                issues = %issues.join(", "),
                "tunnel failed"
            );
        }
    }

    Evaluation {
        timestamp: now,
        score,
        status,
        issues,
    }
}

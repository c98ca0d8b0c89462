use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::*;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod alert;
mod cli;
mod command_runner;
mod config;
mod context;
mod health;
mod identity;
mod models;
mod monitor;
mod outage;
mod ports;
mod probe;
mod recovery;
mod report;
mod stability;
mod storage;
mod system;
#[cfg(test)]
mod testing;

use crate::config::{Settings, load_settings};
use alert::Alerter;
use cli::{Cli, Command};
use command_runner::TokioCommandRunner;
use context::Context;
use models::{CheckRecord, HealthStatus, MonitorState};
use monitor::Monitor;
use ports::{AlertSink, TunnelHost};
use system::SystemHost;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(cli.config.as_deref()).context("Failed to load settings")?;

    let host = SystemHost::new(TokioCommandRunner, &settings)?;
    let alerter = Alerter::new(TokioCommandRunner, &settings)?;
    let ctx = Context::new(&settings, &host, &alerter)?;
    let mut state = MonitorState::new();

    match cli.command {
        Command::Init => init(&ctx).await,
        Command::HealthCheck => health_check(&ctx, &mut state).await,
        Command::Reconnect { reason } => {
            let resolution = recovery::force(&ctx, &mut state, &reason).await;
            let recovered = resolution.is_recovered();
            let verdict = if recovered {
                "recovered".green()
            } else {
                "not recovered".red()
            };
            println!("Reconnect ({}): {} {:?}", reason, verdict, resolution);
            Ok(exit_code(recovered))
        }
        Command::StabilityTest { duration, interval } => {
            let summary = stability::run(
                &ctx,
                &mut state,
                Duration::from_secs(duration),
                Duration::from_secs(interval),
            )
            .await;
            let tier = summary.tier.to_string();
            let tier = if summary.tier.is_acceptable() {
                tier.green()
            } else {
                tier.red()
            };
            println!(
                "Stability: {}/{} healthy samples, {}% ({})",
                summary.success_count, summary.sample_count, summary.success_rate, tier
            );
            Ok(exit_code(summary.tier.is_acceptable()))
        }
        Command::Monitor { duration, interval } => {
            let duration = (duration > 0).then(|| Duration::from_secs(duration));
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or(settings.monitor.check_interval);
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping after the current check");
                    let _ = stop_tx.send(true);
                }
            });

            let mut monitor = Monitor::new(ctx, state);
            monitor.run(duration, interval, stop_rx).await;
            let fatal_alerts = monitor.state().metrics.fatal_alerts;
            info!(phase = ?monitor.phase(), fatal_alerts, "monitor exited");
            Ok(exit_code(fatal_alerts == 0))
        }
        Command::Report { since, until } => {
            health::evaluate(&ctx, &mut state).await;
            report::generate_report(&settings, &state, since, until).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn init<H: TunnelHost, A: AlertSink>(ctx: &Context<'_, H, A>) -> Result<ExitCode> {
    let settings: &Settings = ctx.settings;
    let reporting = &settings.reporting;
    tokio::fs::create_dir_all(&reporting.report_dir)
        .await
        .with_context(|| format!("creating {}", reporting.report_dir.display()))?;
    if let Some(parent) = reporting.history_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    println!("Report directory: {}", reporting.report_dir.display());

    let identity = match identity::load_identity(&settings.tunnel.identity_file).await {
        Ok(identity) => identity,
        Err(e) => {
            println!("{} {}", "Tunnel identity:".bold(), e.to_string().red());
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("{} {}", "Tunnel ID:".bold(), identity.tunnel_id);
    if let Some(account) = &identity.account_tag {
        println!("Account: {}", account);
    }

    let probes = &settings.probes;
    let info = probe::tunnel_info(ctx.host, &identity.tunnel_id, probes.info_timeout).await;
    match &info {
        Some(info) => println!(
            "Tunnel info: {} [{}] ({} connections)",
            info.name.as_deref().unwrap_or("unnamed"),
            info.id,
            info.connections
        ),
        None => println!("Tunnel info: {}", "unavailable".yellow()),
    }

    let hostname = probe::discover_hostname(
        ctx.host,
        info.as_ref(),
        &ctx.hostname_pattern,
        settings.tunnel.log_lines,
        identity.hostname.as_deref(),
        probes.info_timeout,
    )
    .await;
    match hostname {
        Some(hostname) => println!("Hostname: {}", hostname.green()),
        None => {
            warn!("no public hostname found yet");
            println!("Hostname: {}", "not discovered".yellow());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn health_check<H: TunnelHost, A: AlertSink>(
    ctx: &Context<'_, H, A>,
    state: &mut MonitorState,
) -> Result<ExitCode> {
    let evaluation = health::evaluate(ctx, state).await;
    let record = CheckRecord::from_evaluation(&evaluation, state.tunnel.network_connectivity_pct);
    let history_path = &ctx.settings.reporting.history_path;
    if let Err(e) = storage::append_check_record(history_path, &record).await {
        warn!(error = %e, "failed to persist check record");
    }

    let status = match evaluation.status {
        HealthStatus::Healthy => evaluation.status.as_str().green(),
        HealthStatus::Degraded => evaluation.status.as_str().yellow(),
        _ => evaluation.status.as_str().red(),
    };
    println!(
        "Tunnel {} ({}/{}, {}%)",
        status,
        evaluation.score,
        models::HealthChecks::TOTAL,
        evaluation.health_percentage()
    );
    if let Some(hostname) = &state.tunnel.hostname {
        println!("  Hostname: {}", hostname);
    }
    for issue in &evaluation.issues {
        println!("  - {}", issue);
    }
    Ok(exit_code(evaluation.is_healthy()))
}

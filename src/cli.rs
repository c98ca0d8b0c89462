use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Keeps a remote-shell tunnel alive", long_about = None)]
pub(crate) struct Cli {
    /// Configuration file (defaults to config/default.toml when present)
    #[arg(long, global = true)]
    pub(crate) config: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the report directory and verify the tunnel identity
    Init,
    /// Evaluate health once; exits 0 only when healthy
    HealthCheck,
    /// Restart the tunnel client now
    Reconnect {
        #[arg(default_value = "manual")]
        reason: String,
    },
    /// Sample health for a while and grade the stability
    StabilityTest {
        /// Seconds to sample for
        #[arg(default_value_t = 300)]
        duration: u64,
        /// Seconds between samples
        #[arg(default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
    /// Run the monitor loop
    Monitor {
        /// Seconds to run for; 0 runs until interrupted
        #[arg(default_value_t = 0)]
        duration: u64,
        /// Seconds between checks; defaults to monitor.check_interval
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
    /// Write a report from the current state and recorded history
    Report {
        #[arg(long, value_parser = clap::value_parser!(DateTime<Utc>))]
        since: Option<DateTime<Utc>>,
        #[arg(long, value_parser = clap::value_parser!(DateTime<Utc>))]
        until: Option<DateTime<Utc>>,
    },
}

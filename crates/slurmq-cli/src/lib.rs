//! CLI argument parsing for slurmq.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "slurmq")]
#[command(about = "GPU quota accounting and enforcement for Slurm clusters")]
#[command(version)]
pub struct Args {
    /// Cluster profile to use (defaults to `default_cluster`)
    #[arg(short, long, global = true)]
    pub cluster: Option<String>,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (overrides SLURMQ_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// The subcommand, with a bare `slurmq` meaning `slurmq check`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or_default()
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show one user's quota usage
    Check {
        /// User to check (defaults to the current user)
        #[arg(short, long)]
        user: Option<String>,

        /// QoS to check against (defaults to the cluster's first QoS)
        #[arg(long)]
        qos: Option<String>,

        /// Show when GPU hours free up
        #[arg(long)]
        forecast: bool,
    },

    /// Usage for every user on the cluster
    Report {
        #[arg(long, value_enum, default_value_t = ReportFormat::Rich)]
        format: ReportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,

        #[arg(long)]
        qos: Option<String>,

        #[arg(long)]
        account: Option<String>,

        #[arg(long)]
        partition: Option<String>,
    },

    /// Cluster statistics: GPU utilization and queue wait times
    Stats {
        /// Length of the analysed period
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Skip the comparison with the preceding period
        #[arg(long = "no-compare", action = clap::ArgAction::SetFalse)]
        compare: bool,

        /// Partitions to analyse (repeatable)
        #[arg(short, long)]
        partition: Vec<String>,

        /// QoS to analyse when no partition is given (repeatable)
        #[arg(long)]
        qos: Vec<String>,

        /// GPU-hours at or below which a job counts as small
        #[arg(long, default_value = "50")]
        small_threshold: f64,
    },

    /// CPU and memory efficiency of a finished or running job
    #[command(visible_alias = "eff")]
    Efficiency {
        /// Slurm job ID
        job_id: u64,
    },

    /// Periodically check all users, optionally cancelling jobs
    Monitor {
        /// Seconds between checks (defaults to `monitoring.check_interval_minutes`)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Apply the enforcement policy (also requires `enforcement.enabled`)
        #[arg(long)]
        enforce: bool,

        /// Run a single check and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

impl Default for Command {
    fn default() -> Self {
        Self::Check {
            user: None,
            qos: None,
            forecast: false,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConfigAction {
    /// Print the resolved config file path
    Path,
    /// Print the effective configuration
    Show,
    /// Check the configuration for problems
    Validate {
        /// File to validate instead of the resolved config
        #[arg(long)]
        file: Option<Utf8PathBuf>,
    },
    /// Write a starter config with one cluster
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Cluster profile key
        #[arg(long, default_value = "stella")]
        id: String,

        /// Display name (defaults to the profile key, capitalised)
        #[arg(long)]
        name: Option<String>,

        /// Slurm account (empty = any)
        #[arg(long, default_value = "")]
        account: String,

        /// QoS names, comma separated; the first is the default
        #[arg(long, value_delimiter = ',', default_value = "normal")]
        qos: Vec<String>,

        /// Quota limit in GPU-hours
        #[arg(long, default_value = "500")]
        quota: u32,

        /// Rolling window in days
        #[arg(long, default_value = "30")]
        window: u32,
    },
    /// Set one value in the config file, e.g. `display.color false`
    Set {
        /// Dotted key
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Rich,
    Json,
    Csv,
}

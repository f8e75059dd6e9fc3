//! Query job accounting via `sacct --json`.

use crate::command::run_command;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer};
use slurmq_config::ClusterConfig;
use slurmq_core::{JobRecord, JobState};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SacctError {
    #[error("Failed to execute sacct: {0}")]
    ExecutionError(String),
    #[error("Failed to parse sacct output: {0}")]
    ParseError(String),
}

/// Deserialize a field that may be null, defaulting it.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Numbers in sacct JSON: plain, or the `{set, infinite, number}` wrapper
/// newer Slurm versions emit.
#[derive(Deserialize)]
#[serde(untagged)]
enum SlurmNumber {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Wrapped {
        #[serde(default)]
        set: Option<bool>,
        #[serde(default)]
        number: Option<f64>,
    },
    Text(String),
}

impl SlurmNumber {
    fn as_u64(&self) -> u64 {
        match self {
            Self::Unsigned(n) => *n,
            Self::Signed(n) => u64::try_from(*n).unwrap_or(0),
            Self::Float(f) => float_to_u64(*f),
            Self::Wrapped { set: Some(false), .. } => 0,
            Self::Wrapped { number, .. } => number.map(float_to_u64).unwrap_or(0),
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Wrapped { set: Some(false), .. } => String::new(),
            other => other.as_u64().to_string(),
        }
    }
}

fn float_to_u64(f: f64) -> u64 {
    if f.is_finite() && f > 0.0 { f as u64 } else { 0 }
}

/// Deserialize a lenient unsigned number; missing, null or malformed is 0.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SlurmNumber>::deserialize(deserializer)
        .map(|n| n.as_ref().map(SlurmNumber::as_u64).unwrap_or(0))
}

/// Deserialize a value that may be a string or a number into a string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SlurmNumber>::deserialize(deserializer)
        .map(|n| n.as_ref().map(SlurmNumber::to_text).unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
struct SacctOutput {
    #[serde(default, deserialize_with = "nullable")]
    jobs: Vec<serde_json::Value>,
}

/// One job entry from `sacct --json`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SacctJob {
    #[serde(deserialize_with = "lenient_u64")]
    pub job_id: u64,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub user: String,
    #[serde(deserialize_with = "nullable")]
    pub qos: String,
    #[serde(deserialize_with = "nullable")]
    pub account: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub allocation_nodes: u64,
    #[serde(deserialize_with = "nullable")]
    pub state: SacctState,
    #[serde(deserialize_with = "nullable")]
    pub time: SacctTime,
    #[serde(deserialize_with = "nullable")]
    pub tres: SacctTres,
    #[serde(deserialize_with = "nullable")]
    pub required: SacctRequired,
    #[serde(deserialize_with = "nullable")]
    pub steps: Vec<SacctStep>,
}

impl Default for SacctJob {
    fn default() -> Self {
        Self {
            job_id: 0,
            name: String::new(),
            user: String::new(),
            qos: String::new(),
            account: String::new(),
            allocation_nodes: 1,
            state: SacctState::default(),
            time: SacctTime::default(),
            tres: SacctTres::default(),
            required: SacctRequired::default(),
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SacctState {
    /// Current state first
    #[serde(deserialize_with = "nullable")]
    pub current: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SacctTime {
    #[serde(deserialize_with = "lenient_u64")]
    pub elapsed: u64,
    /// Unix seconds, 0 when unset
    #[serde(deserialize_with = "lenient_u64")]
    pub start: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub submission: u64,
    /// CPU time summed over all steps
    #[serde(deserialize_with = "nullable")]
    pub total: CpuTime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CpuTime {
    #[serde(deserialize_with = "lenient_u64")]
    pub seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SacctTres {
    #[serde(deserialize_with = "nullable")]
    pub allocated: Vec<TresEntry>,
}

/// A trackable resource allocation, e.g. `{type: "gres", name: "gpu", count: 4}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TresEntry {
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SacctRequired {
    #[serde(deserialize_with = "lenient_string")]
    pub memory: String,
    /// MB; newer Slurm reports these instead of `memory`
    #[serde(deserialize_with = "lenient_u64")]
    pub memory_per_node: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub memory_per_cpu: u64,
}

impl SacctRequired {
    /// Requested memory in sacct's own notation, `n`/`c` marking per node
    /// or per CPU.
    fn notation(self) -> String {
        if !self.memory.is_empty() {
            self.memory
        } else if self.memory_per_node > 0 {
            format!("{}Mn", self.memory_per_node)
        } else if self.memory_per_cpu > 0 {
            format!("{}Mc", self.memory_per_cpu)
        } else {
            String::new()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SacctStep {
    #[serde(deserialize_with = "nullable")]
    pub statistics: StepStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepStatistics {
    #[serde(rename = "RSS", deserialize_with = "nullable")]
    pub rss: StepStat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StepStat {
    #[serde(deserialize_with = "nullable")]
    pub max: StatValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatValue {
    #[serde(deserialize_with = "lenient_u64")]
    pub value: u64,
}

/// Unix seconds to a timestamp; 0 or out of range maps to the minimum.
fn timestamp_or_min(secs: u64) -> DateTime<Utc> {
    if secs == 0 {
        return DateTime::<Utc>::MIN_UTC;
    }
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn saturating_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl From<SacctJob> for JobRecord {
    fn from(job: SacctJob) -> Self {
        let mut n_gpus = 0;
        let mut n_cpus = 0;
        for tres in &job.tres.allocated {
            if tres.kind == "gres" && tres.name == "gpu" {
                n_gpus = saturating_u32(tres.count);
            } else if tres.kind == "cpu" {
                n_cpus = saturating_u32(tres.count);
            }
        }

        let state = job
            .state
            .current
            .first()
            .map(|s| JobState::from_slurm(s))
            .unwrap_or(JobState::Unknown);

        let max_rss = job
            .steps
            .iter()
            .map(|step| step.statistics.rss.max.value)
            .max()
            .unwrap_or(0);

        JobRecord {
            job_id: job.job_id,
            name: job.name,
            user: job.user,
            qos: job.qos,
            account: job.account,
            n_gpus,
            elapsed_seconds: job.time.elapsed,
            start_time: timestamp_or_min(job.time.start),
            submission_time: timestamp_or_min(job.time.submission),
            state,
            allocation_nodes: saturating_u32(job.allocation_nodes),
            n_cpus,
            cpu_seconds: job.time.total.seconds,
            req_mem: job.required.notation(),
            max_rss,
        }
    }
}

/// Parse full `sacct --json` output into job records.
///
/// Entries that cannot be decoded are skipped with a warning.
pub fn parse_sacct_json(stdout: &str) -> Result<Vec<JobRecord>, SacctError> {
    let output: SacctOutput =
        serde_json::from_str(stdout).map_err(|e| SacctError::ParseError(e.to_string()))?;

    let mut records = Vec::with_capacity(output.jobs.len());
    for value in output.jobs {
        match serde_json::from_value::<SacctJob>(value) {
            Ok(job) => records.push(JobRecord::from(job)),
            Err(e) => tracing::warn!("Failed to parse sacct job entry: {}", e),
        }
    }

    Ok(records)
}

/// Start of a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    /// `now-{N}days`, resolved by sacct against its own clock
    DaysAgo(u32),
    At(DateTime<Utc>),
}

/// Format an instant the way sacct's `-S`/`-E` expect: local wall time.
pub fn slurm_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Parameters for an accounting query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SacctQuery {
    /// `None` queries all users
    pub user: Option<String>,
    pub since: Since,
    /// `None` ends the window at `now`
    pub until: Option<DateTime<Utc>>,
    /// Truncate job times to the window (`-T`)
    pub truncate: bool,
    pub qos: Option<String>,
    pub account: Option<String>,
    pub partition: Option<String>,
}

impl SacctQuery {
    /// All users over the cluster's window, filtered by its default QoS,
    /// account and partition.
    ///
    /// Callers that also filter by window should pin the start with
    /// [`SacctQuery::since`], so `-T` truncation and the filter agree.
    pub fn for_cluster(cluster: &ClusterConfig) -> Self {
        Self {
            user: None,
            since: Since::DaysAgo(cluster.rolling_window_days),
            until: None,
            truncate: true,
            qos: cluster.default_qos().map(str::to_string),
            account: Some(cluster.account.clone()).filter(|a| !a.is_empty()),
            partition: cluster.default_partition().map(str::to_string),
        }
    }

    /// All users between two instants, untruncated and unfiltered.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            user: None,
            since: Since::At(start),
            until: Some(end),
            truncate: false,
            qos: None,
            account: None,
            partition: None,
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Start the window at an absolute instant.
    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.since = Since::At(start);
        self
    }

    /// Override the QoS, account and partition where given.
    pub fn overrides(
        mut self,
        qos: Option<String>,
        account: Option<String>,
        partition: Option<String>,
    ) -> Self {
        if qos.is_some() {
            self.qos = qos;
        }
        if account.is_some() {
            self.account = account;
        }
        if partition.is_some() {
            self.partition = partition;
        }
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Arguments passed to `sacct`.
    pub fn args(&self) -> Vec<String> {
        let start = match self.since {
            Since::DaysAgo(days) => format!("now-{days}days"),
            Since::At(t) => slurm_time(t),
        };
        let end = self.until.map(slurm_time).unwrap_or_else(|| "now".to_string());

        // -X: allocations only, no job steps
        let mut args = vec![
            "-X".to_string(),
            "-S".to_string(),
            start,
            "-E".to_string(),
            end,
            "--json".to_string(),
        ];

        if self.truncate {
            args.push("-T".to_string());
        }
        if let Some(qos) = &self.qos {
            args.push(format!("--qos={qos}"));
        }
        if let Some(account) = &self.account {
            args.push(format!("--account={account}"));
        }
        if let Some(partition) = &self.partition {
            args.push(format!("--partition={partition}"));
        }
        match &self.user {
            Some(user) => args.extend(["-u".to_string(), user.clone()]),
            None => args.push("--allusers".to_string()),
        }

        args
    }
}

/// Arguments for looking up one job, steps included.
pub fn job_args(job_id: u64) -> Vec<String> {
    vec!["-j".to_string(), job_id.to_string(), "--json".to_string()]
}

async fn run_sacct(args: Vec<String>) -> Result<Vec<JobRecord>, SacctError> {
    let mut cmd = Command::new("sacct");
    cmd.args(args);

    let stdout = run_command(&mut cmd, "sacct")
        .await
        .map_err(|e| SacctError::ExecutionError(e.to_string()))?;

    let records = parse_sacct_json(&stdout)?;
    tracing::debug!("sacct returned {} job records", records.len());
    Ok(records)
}

/// Pick `job_id` out of a lookup; array and het jobs may return siblings.
fn select_job(records: Vec<JobRecord>, job_id: u64) -> Option<JobRecord> {
    match records.iter().position(|r| r.job_id == job_id) {
        Some(i) => records.into_iter().nth(i),
        None => records.into_iter().next(),
    }
}

/// Look up a single job; `None` when sacct knows nothing about it.
pub async fn query_job(job_id: u64) -> Result<Option<JobRecord>, SacctError> {
    Ok(select_job(run_sacct(job_args(job_id)).await?, job_id))
}

/// Run sacct and parse its output.
pub async fn query_sacct(query: &SacctQuery) -> Result<Vec<JobRecord>, SacctError> {
    run_sacct(query.args()).await
}

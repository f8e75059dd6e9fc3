//! CPU and memory efficiency of a single job.

use crate::memory::requested_memory_mb;
use crate::models::{JobRecord, JobState};
use serde::Serialize;
use std::fmt;

/// Below this percentage a resource counts as over-requested.
pub const LOW_EFFICIENCY_PCT: f64 = 50.0;

/// Headroom added on top of peak RSS when suggesting a memory request.
const MEMORY_HEADROOM: f64 = 1.2;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Advice derived from a job's efficiency.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Figures cover only the part of the job run so far
    StillRunning,
    /// The job ended badly; efficiency numbers may be misleading
    CheckFailure { state: JobState },
    FewerCpus { requested: u32, suggested: u32 },
    LessMemory { requested_mb: u64, suggested_mb: u64 },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StillRunning => f.write_str("Job is still running; figures are partial"),
            Self::CheckFailure { state } => {
                write!(f, "Job ended {state}; check its logs before resubmitting")
            }
            Self::FewerCpus {
                requested,
                suggested,
            } => write!(
                f,
                "Consider requesting fewer CPUs: {suggested} instead of {requested}"
            ),
            Self::LessMemory {
                requested_mb,
                suggested_mb,
            } => write!(
                f,
                "Consider requesting less memory: {}G instead of {}G",
                suggested_mb / 1024,
                requested_mb.div_ceil(1024)
            ),
        }
    }
}

/// How well a job used what it asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEfficiency {
    pub job_id: u64,
    pub name: String,
    pub user: String,
    pub state: JobState,
    pub n_cpus: u32,
    pub nodes: u32,
    pub elapsed_seconds: u64,
    pub cpu_seconds: u64,
    /// `None` when no core-time was allocated
    pub cpu_efficiency_pct: Option<f64>,
    /// `None` when the request could not be parsed
    pub req_mem_mb: Option<u64>,
    pub max_rss_mb: f64,
    pub memory_efficiency_pct: Option<f64>,
    pub problematic: bool,
    pub recommendations: Vec<Recommendation>,
}

impl JobEfficiency {
    pub fn from_record(record: &JobRecord) -> Self {
        let core_seconds = u64::from(record.n_cpus) * record.elapsed_seconds;
        let cpu_efficiency_pct =
            (core_seconds > 0).then(|| record.cpu_seconds as f64 / core_seconds as f64 * 100.0);

        let req_mem_mb =
            requested_memory_mb(&record.req_mem, record.n_cpus, record.allocation_nodes);
        let max_rss_mb = record.max_rss as f64 / BYTES_PER_MB;
        let memory_efficiency_pct = req_mem_mb
            .filter(|&mb| mb > 0)
            .map(|mb| max_rss_mb / mb as f64 * 100.0);

        let mut efficiency = Self {
            job_id: record.job_id,
            name: record.name.clone(),
            user: record.user.clone(),
            state: record.state,
            n_cpus: record.n_cpus,
            nodes: record.allocation_nodes,
            elapsed_seconds: record.elapsed_seconds,
            cpu_seconds: record.cpu_seconds,
            cpu_efficiency_pct,
            req_mem_mb,
            max_rss_mb,
            memory_efficiency_pct,
            problematic: record.is_problematic(),
            recommendations: Vec::new(),
        };
        efficiency.recommendations = efficiency.recommend();
        efficiency
    }

    fn recommend(&self) -> Vec<Recommendation> {
        let mut advice = Vec::new();

        if self.state.is_running() {
            advice.push(Recommendation::StillRunning);
        }
        if self.problematic {
            advice.push(Recommendation::CheckFailure { state: self.state });
        }

        let low = |pct: Option<f64>| pct.is_some_and(|p| p < LOW_EFFICIENCY_PCT);

        if low(self.cpu_efficiency_pct) && self.n_cpus > 1 {
            let busy = self.cpu_seconds.div_ceil(self.elapsed_seconds.max(1));
            let suggested = u32::try_from(busy).unwrap_or(u32::MAX).max(1);
            if suggested < self.n_cpus {
                advice.push(Recommendation::FewerCpus {
                    requested: self.n_cpus,
                    suggested,
                });
            }
        }

        if let Some(requested_mb) = self.req_mem_mb.filter(|_| low(self.memory_efficiency_pct)) {
            let with_headroom = (self.max_rss_mb * MEMORY_HEADROOM).ceil() as u64;
            let suggested_mb = with_headroom.div_ceil(1024).max(1) * 1024;
            if suggested_mb < requested_mb {
                advice.push(Recommendation::LessMemory {
                    requested_mb,
                    suggested_mb,
                });
            }
        }

        advice
    }
}

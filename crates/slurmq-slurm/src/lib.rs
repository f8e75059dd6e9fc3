//! Slurm integration for slurmq.
//!
//! Fetches job accounting with `sacct --json` and cancels jobs with `scancel`.
//! Both go through [`command`], which also classifies how a command ended.

pub mod command;
pub mod sacct;
pub mod scancel;

pub use command::{CommandError, Completion, run_command, run_command_output, run_completion};
pub use sacct::{
    SacctError, SacctQuery, Since, job_args, parse_sacct_json, query_job, query_sacct, slurm_time,
};
pub use scancel::{Scancel, cancel_job, scancel_args};

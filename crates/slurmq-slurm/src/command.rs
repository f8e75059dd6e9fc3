//! Running Slurm client commands and classifying how they ended.

use std::process::Output;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// How a command that acts on a single job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    /// Non-zero exit whose stderr says the target no longer exists
    TargetGone,
    /// Any other failure, with trimmed stderr
    Failed(String),
}

impl Completion {
    /// Classify an exit status and stderr.
    ///
    /// `gone_markers` are lowercase stderr fragments meaning the target had
    /// already finished; matching is case-insensitive.
    pub fn classify(success: bool, stderr: &str, gone_markers: &[&str]) -> Self {
        if success {
            return Self::Succeeded;
        }

        let stderr = stderr.trim();
        let lower = stderr.to_lowercase();
        if gone_markers.iter().any(|m| lower.contains(m)) {
            Self::TargetGone
        } else if stderr.is_empty() {
            Self::Failed("exited with an error".to_string())
        } else {
            Self::Failed(stderr.to_string())
        }
    }

    pub fn from_output(output: &Output, gone_markers: &[&str]) -> Self {
        Self::classify(
            output.status.success(),
            &String::from_utf8_lossy(&output.stderr),
            gone_markers,
        )
    }
}

/// Execute a command and return stdout as a string.
///
/// Non-zero exit is an error carrying stderr.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    let output = run_command_output(cmd, name).await?;

    match Completion::from_output(&output, &[]) {
        Completion::Succeeded => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Completion::TargetGone | Completion::Failed(_) => Err(CommandError::Failed {
            command: name.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
    }
}

/// Execute a command and return its raw output whatever the exit status.
///
/// Only a failure to spawn is an error.
pub async fn run_command_output(cmd: &mut Command, name: &str) -> Result<Output, CommandError> {
    tracing::debug!("Running {}", name);
    cmd.output().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })
}

/// Execute a command against one target and classify the result.
pub async fn run_completion(
    cmd: &mut Command,
    name: &str,
    gone_markers: &[&str],
) -> Result<Completion, CommandError> {
    let output = run_command_output(cmd, name).await?;
    let completion = Completion::from_output(&output, gone_markers);
    tracing::debug!(command = name, ?completion, "command finished");
    Ok(completion)
}

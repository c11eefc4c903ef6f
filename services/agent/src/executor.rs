//! Job execution.
//!
//! The agent hands each job to an [`Executor`]. In production that is the
//! automation tool ([`AnsibleExecutor`]), which runs the playbook named after
//! the job type and prints the structured result on stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use testlib_id::JobId;
use testlib_proto::{error_codes, Job, JobResult, JobStatus, JobType};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// What the automation tool produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode job params: {0}")]
    Params(#[from] serde_json::Error),
}

/// Runs jobs against the host.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, job: &Job) -> Result<CommandOutput, ExecutorError>;
}

/// Runs `<bin> -i inventory.yml <commands>/<TYPE>.yml -e '<params>'` in the
/// commands directory.
pub struct AnsibleExecutor {
    program: String,
    commands_path: PathBuf,
}

impl AnsibleExecutor {
    pub fn new(program: impl Into<String>, commands_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            commands_path: commands_path.into(),
        }
    }

    fn command(&self, job: &Job) -> Result<Command, ExecutorError> {
        let params = serde_json::to_string(&job.params.to_value())?;
        let playbook = self
            .commands_path
            .join(format!("{}.yml", job.job_type().as_str()));

        let mut command = Command::new(&self.program);
        command
            .arg("-i")
            .arg("inventory.yml")
            .arg(playbook)
            .arg("-e")
            .arg(params)
            .current_dir(&self.commands_path)
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl Executor for AnsibleExecutor {
    async fn run(&self, job: &Job) -> Result<CommandOutput, ExecutorError> {
        let output = self
            .command(job)?
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(job_id = %job.id, status = %output.status, "Playbook exited");
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Deserialize)]
struct PlaybookReport {
    global_custom_stats: JobResult,
}

/// Folds the tool's output into the job: status from the exit code, result
/// from stdout, stderr as an extra error.
pub fn apply_output(job: &mut Job, output: &CommandOutput) {
    job.status = if output.success {
        JobStatus::Ok
    } else {
        JobStatus::Failed
    };

    match serde_json::from_str::<PlaybookReport>(&output.stdout) {
        Ok(report) => {
            let errors = std::mem::take(&mut job.result.errors);
            job.result = report.global_custom_stats;
            job.result.errors.splice(0..0, errors);
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Could not parse job output");
            job.push_error(
                error_codes::PARSE_ERROR,
                format!("AGENT could not parse job output: {}", output.stdout),
            );
            job.status = JobStatus::Failed;
        }
    }

    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        job.push_error(error_codes::UNKNOWN_ERROR, stderr);
    }
}

/// Marks a job that could not be run at all.
pub fn apply_failure(job: &mut Job, error: &ExecutorError) {
    job.status = JobStatus::Failed;
    job.push_error(error_codes::EXECUTION_ERROR, error.to_string());
}

/// Runs `job` on `executor` and records the outcome on it.
pub async fn execute(executor: &dyn Executor, job: &mut Job) {
    match executor.run(job).await {
        Ok(output) => apply_output(job, &output),
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Job could not be executed");
            apply_failure(job, &e);
        }
    }
}

/// Executor returning scripted output, for tests and local development.
#[derive(Default)]
pub struct MockExecutor {
    outputs: Mutex<HashMap<JobType, CommandOutput>>,
    delay: Duration,
    runs: Mutex<Vec<JobId>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run sleeps this long before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Scripts the output for a job type.
    #[must_use]
    pub fn with_output(self, job_type: JobType, output: CommandOutput) -> Self {
        self.set_output(job_type, output);
        self
    }

    pub fn set_output(&self, job_type: JobType, output: CommandOutput) {
        lock(&self.outputs).insert(job_type, output);
    }

    /// Ids of the jobs run so far, in start order.
    pub fn runs(&self) -> Vec<JobId> {
        lock(&self.runs).clone()
    }

    /// Successful output whose result carries `stats`.
    pub fn report(stats: serde_json::Value) -> CommandOutput {
        CommandOutput {
            success: true,
            stdout: serde_json::json!({ "global_custom_stats": stats }).to_string(),
            stderr: String::new(),
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn run(&self, job: &Job) -> Result<CommandOutput, ExecutorError> {
        lock(&self.runs).push(job.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = lock(&self.outputs).get(&job.job_type()).cloned();
        Ok(scripted.unwrap_or_else(|| {
            Self::report(serde_json::json!({ "environment_key": job.environment_key }))
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

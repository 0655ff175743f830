//! Bounded subprocess execution for pipeline steps.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{DeployError, DeployResult};

/// A single external command run inside a working directory.
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable label used in logs and errors, e.g. `npm install`.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Step {
    pub fn new(program: &str, args: &[&str]) -> Self {
        let label = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            label,
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
        }
    }

    /// Override the label, e.g. to keep credentials out of logs.
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(dir);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Finished step, successful or not.
#[derive(Debug)]
pub struct StepOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl StepOutput {
    fn from_output(output: Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        }
    }

    /// Short failure description: trimmed stderr, else the exit code.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return tail(stderr, 2000).to_string();
        }
        match self.code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Run `step` in `dir` to completion, killing it if `limit` elapses.
///
/// A nonzero exit is reported through [`StepOutput::success`]; only spawn
/// failures and timeouts are errors. Callers decide whether a nonzero exit
/// is fatal.
pub async fn run_step(step: &Step, dir: &Path, limit: Duration) -> DeployResult<StepOutput> {
    info!(step = %step.label, dir = %dir.display(), "running step");
    let start = Instant::now();

    let child = step
        .command(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DeployError::LaunchFailed {
            step: step.label.clone(),
            source,
        })?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| DeployError::LaunchFailed {
            step: step.label.clone(),
            source,
        })?,
        Err(_) => {
            // Dropping the future drops the child, which kills it.
            warn!(step = %step.label, secs = limit.as_secs(), "step timed out");
            return Err(DeployError::TimedOut {
                step: step.label.clone(),
                secs: limit.as_secs(),
            });
        }
    };

    let out = StepOutput::from_output(output, start.elapsed());
    debug!(
        step = %step.label,
        code = ?out.code,
        elapsed_ms = out.duration.as_millis() as u64,
        "step finished"
    );
    Ok(out)
}

/// Run `step` and treat a nonzero exit as [`DeployError::BuildFailed`].
pub async fn run_required(step: &Step, dir: &Path, limit: Duration) -> DeployResult<StepOutput> {
    let out = run_step(step, dir, limit).await?;
    if !out.success {
        return Err(DeployError::BuildFailed {
            step: step.label.clone(),
            detail: out.failure_detail(),
        });
    }
    Ok(out)
}

/// Spawn `step` as a detached long-lived process. The caller owns the handle.
pub fn spawn_detached(step: &Step, dir: &Path) -> DeployResult<tokio::process::Child> {
    info!(step = %step.label, dir = %dir.display(), "launching process");
    step.command(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| DeployError::LaunchFailed {
            step: step.label.clone(),
            source,
        })
}

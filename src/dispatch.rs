use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{JobId, RoutingTable};
use crate::error::SleuthError;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Succeeded,
    Failed { code: i32 },
    Crashed { signal: Option<i32> },
    TimedOut,
    NotStarted { message: String },
    Unroutable,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub handler: Option<Utf8PathBuf>,
    pub outcome: DispatchOutcome,
}

/// Runs the handler routed to a job as `<handler> <job-id>`, blocking until it
/// exits. The working directory is the staging root.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routing: RoutingTable,
    workdir: Utf8PathBuf,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(routing: RoutingTable, workdir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            routing,
            workdir: workdir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn dispatch(&self, job: &JobId) -> DispatchResult {
        let Some(route) = self.routing.resolve(job) else {
            tracing::error!(job = %job, "no matching handler found for folder");
            return DispatchResult {
                handler: None,
                outcome: DispatchOutcome::Unroutable,
            };
        };

        let handler = &route.handler;
        tracing::info!(job = %job, handler = %handler, "running handler");
        let started = Instant::now();
        let outcome = match self.run(handler, job) {
            Ok(Some(status)) => outcome_from_status(status),
            Ok(None) => DispatchOutcome::TimedOut,
            Err(err) => DispatchOutcome::NotStarted {
                message: err.to_string(),
            },
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            DispatchOutcome::Succeeded => {
                tracing::info!(job = %job, handler = %handler, elapsed_ms, "successfully processed folder");
            }
            other => {
                tracing::error!(
                    job = %job,
                    handler = %handler,
                    elapsed_ms,
                    outcome = ?other,
                    "handler failed"
                );
            }
        }

        DispatchResult {
            handler: Some(handler.clone()),
            outcome,
        }
    }

    /// `Ok(None)` means the handler hit the timeout and was killed.
    fn run(&self, handler: &Utf8Path, job: &JobId) -> Result<Option<ExitStatus>, SleuthError> {
        // Paths like `bin/run.sh` are taken relative to our cwd, not the
        // staging root the child starts in. Bare names still go through PATH.
        let program = if handler.is_relative() && handler.components().count() > 1 {
            std::env::current_dir()
                .map_err(|err| SleuthError::HandlerSpawn(err.to_string()))?
                .join(handler.as_std_path())
        } else {
            handler.as_std_path().to_path_buf()
        };
        let mut cmd = Command::new(program);
        cmd.arg(job.as_str()).stdin(Stdio::null());
        if self.workdir.as_std_path().is_dir() {
            cmd.current_dir(self.workdir.as_std_path());
        }
        let child = cmd
            .spawn()
            .map_err(|err| SleuthError::HandlerSpawn(format!("{handler}: {err}")))?;
        self.wait(child, handler)
    }

    fn wait(&self, mut child: Child, handler: &Utf8Path) -> Result<Option<ExitStatus>, SleuthError> {
        let Some(timeout) = self.timeout else {
            return child
                .wait()
                .map(Some)
                .map_err(|err| SleuthError::HandlerSpawn(format!("{handler}: {err}")));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|err| SleuthError::HandlerSpawn(format!("{handler}: {err}")))?
            {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(handler = %handler, timeout_secs = timeout.as_secs(), "handler timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

fn outcome_from_status(status: ExitStatus) -> DispatchOutcome {
    if status.success() {
        return DispatchOutcome::Succeeded;
    }
    match status.code() {
        Some(code) => DispatchOutcome::Failed { code },
        None => DispatchOutcome::Crashed {
            signal: exit_signal(status),
        },
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

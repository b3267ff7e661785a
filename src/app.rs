use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bucket::ObjectStore;
use crate::config::ResolvedConfig;
use crate::discover::{Discoverer, PrefixFailure};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::domain::{Job, JobId};
use crate::error::SleuthError;
use crate::ledger::Ledger;
use crate::lock::LockGuard;
use crate::stage::{StageReport, Stager};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Discover only: nothing is claimed, staged or dispatched.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Another run holds the lock. Not an error.
    Skipped { lock: Utf8PathBuf },
    Completed(RunReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub discovered: Vec<Job>,
    pub prefix_failures: Vec<PrefixFailure>,
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: JobId,
    pub stage: StageReport,
    pub handler: Option<Utf8PathBuf>,
    pub outcome: DispatchOutcome,
}

/// One invocation: lock, discover, claim, then stage and dispatch each new
/// job in discovery order. The lock is released on every path out.
pub struct App<S: ObjectStore, L: Ledger> {
    store: S,
    ledger: L,
    stager: Stager,
    dispatcher: Dispatcher,
    marker: String,
    lock_path: Utf8PathBuf,
}

impl<S: ObjectStore, L: Ledger> App<S, L> {
    pub fn new(store: S, ledger: L, config: &ResolvedConfig) -> Self {
        Self {
            store,
            ledger,
            stager: Stager::new(config.staging_root.clone()),
            dispatcher: Dispatcher::new(config.routing.clone(), config.staging_root.clone())
                .with_timeout(config.handler_timeout),
            marker: config.marker.clone(),
            lock_path: config.lock_path.clone(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn run(&mut self, options: RunOptions) -> Result<RunOutcome, SleuthError> {
        let Some(lock) = LockGuard::acquire(&self.lock_path)? else {
            tracing::info!(lock = %self.lock_path, "another run is active, skipping");
            return Ok(RunOutcome::Skipped {
                lock: self.lock_path.clone(),
            });
        };
        tracing::debug!(lock = %lock.path(), "lock acquired");

        let result = self.run_locked(options);
        lock.release();

        if let Err(err) = &result {
            tracing::error!(error = %err, "run aborted");
        }
        result.map(RunOutcome::Completed)
    }

    fn run_locked(&mut self, options: RunOptions) -> Result<RunReport, SleuthError> {
        let started_at = Utc::now();
        let claimed = self.ledger.load_claimed()?;
        tracing::debug!(claimed = claimed.len(), "loaded ledger");

        let discovery = Discoverer::new(self.dispatcher.routing(), &self.marker)
            .discover(&self.store, &claimed)?;
        if discovery.jobs.is_empty() {
            tracing::info!("no new folders ready for processing");
        } else {
            tracing::info!(count = discovery.jobs.len(), "discovered new folders");
        }

        let mut report = RunReport {
            started_at,
            finished_at: started_at,
            dry_run: options.dry_run,
            discovered: discovery.jobs,
            prefix_failures: discovery.failures,
            jobs: Vec::new(),
        };

        if options.dry_run || report.discovered.is_empty() {
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let ids = report
            .discovered
            .iter()
            .map(|job| job.id.clone())
            .collect::<Vec<_>>();
        self.ledger.claim(&ids)?;
        tracing::info!(count = ids.len(), "claimed folders in ledger");

        for id in &ids {
            let stage = self.stager.stage(&self.store, id)?;
            if !stage.is_complete() {
                tracing::warn!(
                    job = %id,
                    failed = stage.failed,
                    "staging incomplete, dispatching anyway"
                );
            }
            let dispatch = self.dispatcher.dispatch(id);
            report.jobs.push(JobReport {
                id: id.clone(),
                stage,
                handler: dispatch.handler,
                outcome: dispatch.outcome,
            });
        }

        report.finished_at = Utc::now();
        tracing::info!(
            dispatched = report.jobs.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "run finished"
        );
        Ok(report)
    }
}

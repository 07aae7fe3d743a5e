//! Shared application state

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use orchestrator::{
    ExecutionMode, ExecutionScheduler, JobHandle, JobState, JobStatus, RunSummary,
};
use uuid::Uuid;

/// What the server remembers about a submitted run
pub enum RunRecord {
    /// Ran inline; only the outcome is kept
    Immediate {
        /// Final summary
        summary: RunSummary,
        /// Frames produced
        frames: usize,
    },
    /// Running or finished on a worker
    Queued(JobHandle),
}

impl RunRecord {
    /// Execution mode of the run
    pub fn mode(&self) -> ExecutionMode {
        match self {
            RunRecord::Immediate { .. } => ExecutionMode::Immediate,
            RunRecord::Queued(_) => ExecutionMode::Queued,
        }
    }

    /// Status snapshot; inline runs are always finished
    pub fn status(&self) -> JobStatus {
        match self {
            RunRecord::Immediate { summary, .. } => JobStatus {
                state: JobState::Finished,
                step: summary.steps,
                total_steps: summary.steps,
                time: summary.time,
                particles: summary.particles,
                error: None,
                summary: Some(summary.clone()),
            },
            RunRecord::Queued(job) => job.status(),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Scheduler every run goes through
    pub scheduler: Arc<ExecutionScheduler>,
    /// Submitted runs (ID -> record)
    pub runs: Mutex<HashMap<Uuid, RunRecord>>,
    /// Path to the scene configs directory
    pub configs_dir: PathBuf,
    /// Server port
    pub port: u16,
}

impl AppState {
    /// Create new application state
    pub fn new(scheduler: ExecutionScheduler, configs_dir: PathBuf, port: u16) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            runs: Mutex::new(HashMap::new()),
            configs_dir,
            port,
        }
    }

    /// Lock the run table
    pub fn runs(&self) -> MutexGuard<'_, HashMap<Uuid, RunRecord>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queued job handle for `id`, if any
    pub fn job(&self, id: &Uuid) -> Option<JobHandle> {
        match self.runs().get(id) {
            Some(RunRecord::Queued(job)) => Some(job.clone()),
            _ => None,
        }
    }
}

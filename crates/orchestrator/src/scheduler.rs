//! Execution scheduler: runs small scenes inline and queues large ones.
//!
//! Both paths call the same [`run_loop`]. They differ in the backend
//! ([`Sequential`] inline, [`Parallel`] queued), in where frames go (returned
//! in memory or written to `<output_dir>/<run id>.dtrj`) and in how progress
//! is observed (not at all, or through a [`JobHandle`]).

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kernel::{Parallel, Sequential, SimulationKernel};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExecutionPolicy;
use crate::error::{JobError, RunError, SetupError};
use crate::runner::{run_loop, ProgressEvent, RunOptions, RunSummary};
use crate::scene::{Scene, SceneEstimate};
use crate::trajectory::{ResultFrame, StorageSink, TrajectoryHeader, TrajectoryWriter};

/// Fixed memory per sphere: store, contact history and broad-phase entries.
pub const BYTES_PER_SPHERE: u64 = 1024;
/// Per-thread force and torque buffers, per sphere.
pub const BYTES_PER_SPHERE_PER_THREAD: u64 = 48;

/// Where a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Synchronously in the caller, results inline.
    Immediate,
    /// On a worker, results in durable storage.
    Queued,
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker
    Queued,
    /// Stepping
    Running,
    /// Ran to the end
    Finished,
    /// Stopped by an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobState {
    /// Whether the job can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Cancelled)
    }
}

fn display_error<S: Serializer>(error: &Option<JobError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    /// Lifecycle state
    pub state: JobState,
    /// Completed steps
    pub step: u64,
    /// Steps the run will take
    pub total_steps: u64,
    /// Simulated time
    pub time: f64,
    /// Spheres in the store
    pub particles: usize,
    /// Terminal error, if the job failed
    #[serde(serialize_with = "display_error")]
    pub error: Option<JobError>,
    /// Final summary, once finished or cancelled
    pub summary: Option<RunSummary>,
}

struct JobShared {
    id: Uuid,
    output_path: PathBuf,
    status: Mutex<JobStatus>,
    changed: Condvar,
    cancel: AtomicBool,
    progress: Mutex<Option<Receiver<ProgressEvent>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobShared {
    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        f(&mut lock(&self.status));
        self.changed.notify_all();
    }
}

/// Observer and controller of one queued job. Clones share the job.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("state", &self.status().state)
            .finish()
    }
}

impl JobHandle {
    /// Run id.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Trajectory file the job writes.
    pub fn output_path(&self) -> &std::path::Path {
        &self.shared.output_path
    }

    /// Current snapshot.
    pub fn status(&self) -> JobStatus {
        lock(&self.shared.status).clone()
    }

    /// Ask the job to stop after its current step.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Relaxed);
    }

    /// Progress receiver. Only the first caller gets it.
    pub fn take_progress(&self) -> Option<Receiver<ProgressEvent>> {
        lock(&self.shared.progress).take()
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> JobStatus {
        let mut status = lock(&self.shared.status);
        while !status.state.is_terminal() {
            status = self
                .shared
                .changed
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
        status.clone()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobStatus> {
        let status = lock(&self.shared.status);
        let (status, _) = self
            .shared
            .changed
            .wait_timeout_while(status, timeout, |s| !s.state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        status.state.is_terminal().then(|| status.clone())
    }
}

/// Result delivery of a submitted run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Finished inline.
    Immediate {
        /// Final summary
        summary: RunSummary,
        /// Every frame, in order
        frames: Vec<ResultFrame>,
    },
    /// Running on a worker.
    Queued(JobHandle),
}

/// What [`ExecutionScheduler::submit`] returns.
#[derive(Debug)]
pub struct RunHandle {
    /// Run id
    pub id: Uuid,
    /// Chosen mode
    pub mode: ExecutionMode,
    /// Size estimate the choice was based on
    pub estimate: SceneEstimate,
    /// Result delivery
    pub outcome: RunOutcome,
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

struct Job {
    scene: Scene,
    shared: Arc<JobShared>,
    progress: Sender<ProgressEvent>,
    policy: ExecutionPolicy,
}

struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(count: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..count.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("dem-worker-{i}"))
                    .spawn(move || worker_loop(&receiver))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("failed to spawn worker: {}", e);
                    None
                }
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    fn send(&self, job: Job) -> Result<(), Job> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|SendError(job)| job),
            None => Err(job),
        }
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let next = lock(receiver).recv();
        match next {
            Ok(job) => execute(job),
            Err(_) => break,
        }
    }
}

fn execute(job: Job) {
    let shared = Arc::clone(&job.shared);
    if shared.cancel.load(Ordering::Relaxed) {
        shared.update(|s| s.state = JobState::Cancelled);
        return;
    }
    shared.update(|s| s.state = JobState::Running);
    info!(run = %shared.id, "queued run started");

    let result = panic::catch_unwind(AssertUnwindSafe(|| run_queued(&job)))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(JobError::WorkerPanic(message))
        });

    match result {
        Ok(summary) => {
            info!(run = %shared.id, steps = summary.steps, cancelled = summary.cancelled, "queued run ended");
            shared.update(|s| {
                s.state = if summary.cancelled {
                    JobState::Cancelled
                } else {
                    JobState::Finished
                };
                s.step = summary.steps;
                s.time = summary.time;
                s.particles = summary.particles;
                s.summary = Some(summary);
            });
        }
        Err(e) => {
            error!(run = %shared.id, "queued run failed: {}", e);
            shared.update(|s| {
                s.state = JobState::Failed;
                s.error = Some(e);
            });
        }
    }
}

/// Spheres that fit `budget` bytes with `threads` force buffers.
pub fn max_spheres_for_budget(budget: u64, threads: usize) -> usize {
    let per_sphere = BYTES_PER_SPHERE + BYTES_PER_SPHERE_PER_THREAD * threads as u64;
    (budget / per_sphere) as usize
}

fn run_queued(job: &Job) -> Result<RunSummary, JobError> {
    let policy = &job.policy;
    let backend = match policy.threads_per_run {
        Some(n) => Parallel::with_threads(n)
            .map_err(|e| SetupError::Invalid(format!("cannot build a {n}-thread pool: {e}")))?,
        None => Parallel::new(),
    };

    let estimate = job.scene.estimate();
    let suggested_max = max_spheres_for_budget(policy.memory_budget_bytes, backend.threads());
    if estimate.peak_spheres > suggested_max {
        return Err(JobError::ResourceExhausted {
            requested: estimate.peak_spheres,
            suggested_max,
        });
    }

    let (mut kernel, mut factory) = job.scene.build_kernel(backend)?;
    let options = RunOptions::for_scene(&job.scene, policy.progress_interval);
    job.shared.update(|s| {
        s.total_steps = options.total_steps;
        s.particles = kernel.state().particles.len();
    });

    let header = TrajectoryHeader::new(
        job.scene.output_stride(),
        job.scene.dt(),
        job.scene.material_names(),
        job.scene.geometry_reference(),
    );
    let path = &job.shared.output_path;
    let writer = policy
        .retry
        .run("trajectory create", |_| {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            TrajectoryWriter::create(path, &header)
        })
        .map_err(RunError::from)?;
    let mut sink = StorageSink::new(writer, policy.retry.clone());

    let shared = &job.shared;
    let mut on_progress = |event: ProgressEvent| {
        shared.update(|s| {
            s.step = event.step;
            s.time = event.time;
            s.particles = event.particles;
        });
        // The observer may have dropped its receiver.
        let _ = job.progress.send(event);
    };

    Ok(run_loop(
        &mut kernel,
        &mut factory,
        &options,
        &mut sink,
        &mut on_progress,
        &shared.cancel,
    )?)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Accepts scenes and runs them in the mode their size calls for.
pub struct ExecutionScheduler {
    policy: ExecutionPolicy,
    pool: Mutex<WorkerPool>,
}

impl ExecutionScheduler {
    /// Start the worker pool.
    pub fn new(policy: ExecutionPolicy) -> Self {
        let pool = WorkerPool::spawn(policy.workers);
        info!(
            workers = policy.workers,
            immediate_threshold = policy.immediate_threshold,
            "execution scheduler ready"
        );
        Self {
            policy,
            pool: Mutex::new(pool),
        }
    }

    /// Policy in force.
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Mode a scene with this estimate would run in.
    pub fn choose_mode(&self, estimate: &SceneEstimate) -> ExecutionMode {
        if let Some(mode) = self.policy.force_mode {
            return mode;
        }
        if !estimate.has_clumps && estimate.peak_bodies <= self.policy.immediate_threshold {
            ExecutionMode::Immediate
        } else {
            ExecutionMode::Queued
        }
    }

    /// Run or enqueue a scene.
    ///
    /// Immediate runs return their frames; their failures come back here.
    /// Queued runs return a [`JobHandle`] and report failures through it,
    /// except dispatch failures.
    pub fn submit(&self, scene: Scene) -> Result<RunHandle, JobError> {
        let id = Uuid::new_v4();
        let estimate = scene.estimate();
        let mode = self.choose_mode(&estimate);
        info!(
            run = %id,
            scene = scene.name(),
            ?mode,
            peak_bodies = estimate.peak_bodies,
            has_clumps = estimate.has_clumps,
            "run submitted"
        );

        let outcome = match mode {
            ExecutionMode::Immediate => {
                let (mut kernel, mut factory) = scene.build_kernel(Sequential)?;
                let options = RunOptions::for_scene(&scene, self.policy.progress_interval);
                let mut frames: Vec<ResultFrame> = Vec::new();
                let summary = run_loop(
                    &mut kernel,
                    &mut factory,
                    &options,
                    &mut frames,
                    &mut |_| {},
                    &AtomicBool::new(false),
                )?;
                RunOutcome::Immediate { summary, frames }
            }
            ExecutionMode::Queued => RunOutcome::Queued(self.enqueue(id, scene)?),
        };

        Ok(RunHandle {
            id,
            mode,
            estimate,
            outcome,
        })
    }

    fn enqueue(&self, id: Uuid, scene: Scene) -> Result<JobHandle, JobError> {
        let (progress_tx, progress_rx) = mpsc::channel();
        let shared = Arc::new(JobShared {
            id,
            output_path: self.policy.output_dir.join(format!("{id}.dtrj")),
            status: Mutex::new(JobStatus {
                state: JobState::Queued,
                step: 0,
                total_steps: scene.total_steps(),
                time: 0.0,
                particles: 0,
                error: None,
                summary: None,
            }),
            changed: Condvar::new(),
            cancel: AtomicBool::new(false),
            progress: Mutex::new(Some(progress_rx)),
        });

        let mut pending = Some(Job {
            scene,
            shared: Arc::clone(&shared),
            progress: progress_tx,
            policy: self.policy.clone(),
        });
        self.policy
            .retry
            .run("job dispatch", |_| {
                let job = pending.take().ok_or("job already dispatched")?;
                let mut pool = lock(&self.pool);
                match pool.send(job) {
                    Ok(()) => Ok(()),
                    Err(job) => {
                        pending = Some(job);
                        warn!("worker pool is gone, respawning");
                        pool.shutdown();
                        *pool = WorkerPool::spawn(self.policy.workers);
                        Err("worker pool closed")
                    }
                }
            })
            .map_err(|e| JobError::Dispatch {
                attempts: e.attempts,
                message: e.last.to_string(),
            })?;

        Ok(JobHandle { shared })
    }

    #[cfg(test)]
    fn break_pool(&self) {
        let mut pool = lock(&self.pool);
        pool.shutdown();
    }
}

impl Drop for ExecutionScheduler {
    fn drop(&mut self) {
        lock(&self.pool).shutdown();
    }
}

//! Orchestration Layer
//!
//! This crate turns scene descriptions into runs of the DEM kernel:
//! - Scene configuration and validation
//! - Boundary geometry (STL files and primitive builders)
//! - Scene assembly and timestep selection
//! - The step loop shared by every run
//! - Immediate and queued execution with progress and cancellation
//! - Binary trajectory output
//! - Import of third-party particle libraries

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod import;
pub mod retry;
pub mod runner;
pub mod scene;
pub mod scheduler;
pub mod trajectory;

pub use config::{ExecutionPolicy, SceneConfig, SourceConfig};
pub use error::{JobError, RunError, SetupError};
pub use geometry::GeometryConfig;
pub use retry::RetryPolicy;
pub use runner::{run_loop, ProgressEvent, RunOptions, RunSummary};
pub use scene::{Scene, SceneEstimate};
pub use scheduler::{
    ExecutionMode, ExecutionScheduler, JobHandle, JobState, JobStatus, RunHandle, RunOutcome,
};
pub use trajectory::{FrameRecord, FrameSink, ResultFrame, TrajectoryReader, TrajectoryWriter};

use std::path::Path;

/// Load a scene file and assemble it.
///
/// Geometry paths inside the file resolve relative to its directory. All
/// configuration errors, including a timestep above the critical value,
/// are reported here before anything runs.
///
/// # Example
/// ```no_run
/// use orchestrator::{create_scene, ExecutionPolicy, ExecutionScheduler};
///
/// let scene = create_scene("configs/settling_column.json")?;
/// let scheduler = ExecutionScheduler::new(ExecutionPolicy::default());
/// let run = scheduler.submit(scene)?;
/// println!("run {} in {:?} mode", run.id, run.mode);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_scene(config_path: impl AsRef<Path>) -> Result<scene::Scene, SetupError> {
    let path = config_path.as_ref();
    tracing::info!("Creating scene from config: {}", path.display());
    let scene = scene::Scene::load(path)?;
    let estimate = scene.estimate();
    tracing::info!(
        "Scene '{}' ready: dt={:.3e}s, {} steps, peak {} bodies ({} spheres)",
        scene.name(),
        scene.dt(),
        scene.total_steps(),
        estimate.peak_bodies,
        estimate.peak_spheres
    );
    Ok(scene)
}

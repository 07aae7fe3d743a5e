//! The step loop shared by immediate and queued runs.
//!
//! [`run_loop`] owns nothing: it drives a kernel, feeds it injected bodies,
//! hands frames to a [`FrameSink`] and reports progress through a callback.
//! Cancellation is observed between steps only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use kernel::{ParticleFactory, SimulationKernel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RunError;
use crate::scene::Scene;
use crate::trajectory::{FrameSink, ResultFrame};

/// Loop bounds and reporting cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Steps to run
    pub total_steps: u64,
    /// Write a frame every this many steps
    pub output_stride: u64,
    /// Report progress every this many steps
    pub progress_every: u64,
}

impl RunOptions {
    /// Options covering a scene's full duration.
    pub fn for_scene(scene: &Scene, progress_every: u64) -> Self {
        Self {
            total_steps: scene.total_steps(),
            output_stride: scene.output_stride(),
            progress_every,
        }
    }
}

/// Progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Completed steps
    pub step: u64,
    /// Steps the run will take
    pub total_steps: u64,
    /// Simulated time
    pub time: f64,
    /// Spheres in the store
    pub particles: usize,
    /// Wall-clock estimate of the remaining time (seconds)
    pub eta_seconds: f64,
}

/// Outcome of a completed or cancelled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Steps taken
    pub steps: u64,
    /// Simulated time reached
    pub time: f64,
    /// Frames handed to the sink
    pub frames: u64,
    /// Spheres at the end
    pub particles: usize,
    /// Whether the run stopped on request
    pub cancelled: bool,
    /// Execution backend used
    pub backend: String,
}

/// Write a frame; on failure finalise the sink before reporting.
fn write_or_finish(sink: &mut dyn FrameSink, frame: &ResultFrame) -> Result<(), RunError> {
    if let Err(e) = sink.write_frame(frame) {
        if let Err(finish) = sink.finish() {
            warn!("could not finalise trajectory after write failure: {}", finish);
        }
        return Err(e);
    }
    Ok(())
}

/// Drive `kernel` for `options.total_steps` steps.
///
/// The state at entry is written as the first frame; afterwards a frame is
/// written every `output_stride` steps, and once more at the end if the last
/// step did not fall on the stride.
pub fn run_loop(
    kernel: &mut dyn SimulationKernel,
    factory: &mut ParticleFactory,
    options: &RunOptions,
    sink: &mut dyn FrameSink,
    progress: &mut dyn FnMut(ProgressEvent),
    cancel: &AtomicBool,
) -> Result<RunSummary, RunError> {
    let started = Instant::now();
    let stride = options.output_stride.max(1);
    let report_every = options.progress_every.max(1);
    let mut frames = 0u64;
    let mut cancelled = false;
    let mut last_written = kernel.state().step;

    sink.write_frame(&ResultFrame::capture(kernel.state()))?;
    frames += 1;

    for step in 1..=options.total_steps {
        if cancel.load(Ordering::Relaxed) {
            info!(step = step - 1, "run cancelled");
            cancelled = true;
            break;
        }

        factory.inject(kernel.state_mut());
        if let Err(e) = kernel.step() {
            if let Err(finish) = sink.finish() {
                warn!("could not finalise trajectory after step failure: {}", finish);
            }
            return Err(e.into());
        }

        if step % stride == 0 {
            write_or_finish(sink, &ResultFrame::capture(kernel.state()))?;
            frames += 1;
            last_written = kernel.state().step;
        }

        if step % report_every == 0 || step == options.total_steps {
            let elapsed = started.elapsed().as_secs_f64();
            let eta_seconds = elapsed / step as f64 * (options.total_steps - step) as f64;
            let event = ProgressEvent {
                step,
                total_steps: options.total_steps,
                time: kernel.state().time,
                particles: kernel.particle_count(),
                eta_seconds,
            };
            debug!(
                "Step {}/{}: t={:.5}s, particles={}, contacts={}, eta={:.1}s",
                step,
                options.total_steps,
                event.time,
                event.particles,
                kernel.contact_count(),
                eta_seconds
            );
            progress(event);
        }
    }

    if !cancelled && kernel.state().step != last_written {
        write_or_finish(sink, &ResultFrame::capture(kernel.state()))?;
        frames += 1;
    }
    sink.finish()?;

    let state = kernel.state();
    let summary = RunSummary {
        steps: state.step,
        time: state.time,
        frames,
        particles: state.particles.len(),
        cancelled,
        backend: kernel.backend_name().to_string(),
    };
    info!(
        "Run finished: {} steps, {:.4}s simulated, {} frames, {:.2}s wall",
        summary.steps,
        summary.time,
        summary.frames,
        started.elapsed().as_secs_f64()
    );
    Ok(summary)
}

//! Reference test framework for DEM validation
//!
//! Runs scene files to completion and checks the final particle state
//! against physical expectations. Closed-form references live in
//! [`analytical`].

pub mod analytical;
#[cfg(test)]
mod benchmarks;

use anyhow::{Context, Result};
use glam::DVec3;
use kernel::{Sequential, SimulationKernel, SimulationState};
use orchestrator::{ProgressEvent, ResultFrame, RunOptions};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Every sphere centre must stay inside this box
    pub position_bounds: Option<PositionBoundsCheck>,
    /// Bodies must come to rest below a height
    pub settling: Option<SettlingCheck>,
    /// Mean kinetic energy per body must drop below a limit
    pub energy: Option<EnergyCheck>,
    /// Final body count must fall in a range
    pub population: Option<PopulationCheck>,
}

/// Check that particles remain within specified bounds
#[derive(Debug, Clone)]
pub struct PositionBoundsCheck {
    /// Minimum allowed position
    pub min: DVec3,
    /// Maximum allowed position
    pub max: DVec3,
}

/// Check that particles have settled near the floor
#[derive(Debug, Clone)]
pub struct SettlingCheck {
    /// Floor Y position
    pub floor_y: f64,
    /// Highest allowed sphere top above the floor (m)
    pub max_height: f64,
}

/// Check that the packing has come to rest
#[derive(Debug, Clone)]
pub struct EnergyCheck {
    /// Mean kinetic energy per body (J)
    pub max_kinetic_per_body: f64,
}

/// Check the number of bodies at the end of the run
#[derive(Debug, Clone)]
pub struct PopulationCheck {
    /// Fewest bodies allowed
    pub min: usize,
    /// Most bodies allowed
    pub max: usize,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of timesteps executed
    pub steps: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
    /// Bodies at the end of the run
    pub bodies: usize,
    /// Total kinetic energy at the end of the run (J)
    pub kinetic_energy: f64,
    /// Frames the run produced
    pub frames: usize,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail, on success or failure
    pub message: Option<String>,
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to the scene file
    pub config_path: PathBuf,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the scene for its full duration on the sequential backend and
    /// validate the final state.
    pub fn run(&self) -> Result<TestResult> {
        tracing::info!("Running reference test: {}", self.name);

        let scene = orchestrator::create_scene(&self.config_path)
            .with_context(|| format!("loading scene {}", self.config_path.display()))?;
        let (mut kernel, mut factory) = scene.build_kernel(Sequential)?;

        let total = scene.total_steps();
        tracing::info!(
            "Initialized: {} spheres, dt={:.3e}s, {} steps",
            kernel.particle_count(),
            scene.dt(),
            total
        );

        let options = RunOptions::for_scene(&scene, (total / 10).max(1));
        let mut frames: Vec<ResultFrame> = Vec::new();
        let cancel = AtomicBool::new(false);
        let mut report = |e: ProgressEvent| {
            let progress = e.step as f64 / e.total_steps.max(1) as f64 * 100.0;
            tracing::info!("Progress: {:.0}% ({}/{})", progress, e.step, e.total_steps);
        };
        let summary = orchestrator::run_loop(
            &mut kernel,
            &mut factory,
            &options,
            &mut frames,
            &mut report,
            &cancel,
        )?;
        tracing::info!("Simulation complete: {} steps, {:.6}s simulated", summary.steps, summary.time);

        let state = kernel.state();
        let checks = self.validate(state);
        let passed = checks.iter().all(|c| c.passed);

        Ok(TestResult {
            name: self.name.clone(),
            passed,
            checks,
            steps: summary.steps,
            sim_time: summary.time,
            bodies: state.body_count(),
            kinetic_energy: state.kinetic_energy(),
            frames: frames.len(),
        })
    }

    /// Apply every configured check to `state`.
    pub fn validate(&self, state: &SimulationState) -> Vec<CheckResult> {
        let mut checks = Vec::new();
        if let Some(ref bounds) = self.expected.position_bounds {
            checks.push(validate_position_bounds(state, bounds));
        }
        if let Some(ref settling) = self.expected.settling {
            checks.push(validate_settling(state, settling));
        }
        if let Some(ref energy) = self.expected.energy {
            checks.push(validate_energy(state, energy));
        }
        if let Some(ref population) = self.expected.population {
            checks.push(validate_population(state, population));
        }
        checks
    }
}

fn outcome(name: &str, passed: bool, message: String) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed,
        message: Some(message),
    }
}

/// Validate that particles remain within specified bounds
fn validate_position_bounds(state: &SimulationState, bounds: &PositionBoundsCheck) -> CheckResult {
    let mut violations = 0;
    let mut max_violation = 0.0_f64;

    for p in &state.particles.position {
        let below = (bounds.min - *p).max(DVec3::ZERO);
        let above = (*p - bounds.max).max(DVec3::ZERO);
        let worst = below.max_element().max(above.max_element());
        if worst > 0.0 {
            violations += 1;
            max_violation = max_violation.max(worst);
        }
    }

    if violations == 0 {
        CheckResult {
            name: "Position Bounds".to_string(),
            passed: true,
            message: None,
        }
    } else {
        outcome(
            "Position Bounds",
            false,
            format!("{violations} spheres out of bounds (max violation: {max_violation:.6} m)"),
        )
    }
}

/// Validate that every sphere top lies below the allowed height
fn validate_settling(state: &SimulationState, check: &SettlingCheck) -> CheckResult {
    let p = &state.particles;
    let limit = check.floor_y + check.max_height;
    let tops = (0..p.len()).map(|i| p.position[i].y + p.radius[i]);
    let highest = tops.clone().fold(check.floor_y, f64::max);
    let unsettled = tops.filter(|&top| top > limit).count();

    let message = format!(
        "{} / {} spheres settled (highest top: {:.6} m, limit: {:.6} m)",
        p.len() - unsettled,
        p.len(),
        highest,
        limit
    );
    outcome("Settling", unsettled == 0 && !p.is_empty(), message)
}

/// Validate that the packing has lost its kinetic energy
fn validate_energy(state: &SimulationState, check: &EnergyCheck) -> CheckResult {
    let bodies = state.body_count();
    if bodies == 0 {
        return outcome("Kinetic Energy", false, "No bodies".to_string());
    }
    let mean = state.kinetic_energy() / bodies as f64;
    let passed = mean <= check.max_kinetic_per_body;
    outcome(
        "Kinetic Energy",
        passed,
        format!(
            "Mean per body: {:.3e} J (limit: {:.3e} J)",
            mean, check.max_kinetic_per_body
        ),
    )
}

/// Validate the final body count
fn validate_population(state: &SimulationState, check: &PopulationCheck) -> CheckResult {
    let bodies = state.body_count();
    let passed = (check.min..=check.max).contains(&bodies);
    outcome(
        "Population",
        passed,
        format!("{} bodies (expected {}..={})", bodies, check.min, check.max),
    )
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Timesteps: {}", self.steps);
        println!("Simulated time: {:.6} s", self.sim_time);
        println!("Bodies: {}", self.bodies);
        println!("Kinetic energy: {:.3e} J", self.kinetic_energy);
        println!("Frames: {}", self.frames);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}

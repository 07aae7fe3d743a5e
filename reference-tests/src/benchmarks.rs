//! Granular flow benchmarks.
//!
//! Long-running tests that compare bulk behaviour against empirical
//! correlations. They are marked with `#[ignore]` so they only run when
//! explicitly requested via:
//!
//! ```sh
//! cargo test --release -p reference-tests -- --ignored
//! ```

use crate::analytical::{self, BeverlooFlow};
use glam::DVec3;
use kernel::{Parallel, SimulationKernel};
use orchestrator::{ProgressEvent, ResultFrame, RunOptions, Scene, SceneConfig};
use std::path::Path;
use std::sync::atomic::AtomicBool;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .try_init();
}

// ---------------------------------------------------------------------------
// Angle of repose
// ---------------------------------------------------------------------------

const HEAP_SCENE: &str = r#"{
    "name": "heap",
    "geometry": {"type": "floor", "center": [0, 0, 0], "half_size": 0.15},
    "materials": [{
        "name": "sand", "youngs_modulus": 5.0e7, "poisson_ratio": 0.3,
        "density": 2650.0, "restitution": 0.4, "friction": 0.5,
        "wall_friction": 0.8, "rolling_friction": 0.1
    }],
    "sources": [{
        "material": "sand",
        "kind": {
            "type": "surface_injection",
            "origin": [-0.01, 0.06, -0.01],
            "edge_u": [0.02, 0, 0],
            "edge_v": [0, 0, 0.02],
            "rate": 2500.0,
            "max_count": 4000
        },
        "size": {"type": "uniform", "min": 0.0015, "max": 0.002},
        "velocity": [0, -0.5, 0]
    }],
    "duration": 3.0,
    "output_stride": 5000,
    "domain": {"min": [-0.15, -0.05, -0.15], "max": [0.15, 0.2, 0.15]},
    "seed": 17
}"#;

/// Angle of repose benchmark.
///
/// Spheres are poured from a small patch onto a rough floor and allowed to
/// come to rest. The heap slope must lie within 3 degrees of `atan(mu)`.
#[test]
#[ignore]
fn benchmark_angle_of_repose() {
    init_logging();

    let config = SceneConfig::from_json(HEAP_SCENE).expect("Invalid heap scene");
    let friction = config.materials[0].friction;
    let scene = Scene::assemble(&config, Path::new(".")).expect("Failed to assemble heap scene");
    let backend = Parallel::new();
    let (mut kernel, mut factory) = scene.build_kernel(backend).expect("Failed to build kernel");

    let options = RunOptions::for_scene(&scene, scene.total_steps() / 20);
    let mut frames: Vec<ResultFrame> = Vec::new();
    let cancel = AtomicBool::new(false);
    let mut report = |e: ProgressEvent| {
        tracing::info!("Heap step {}/{}, {} spheres", e.step, e.total_steps, e.particles);
    };
    let summary = orchestrator::run_loop(&mut kernel, &mut factory, &options, &mut frames, &mut report, &cancel)
        .expect("Heap run failed");

    let p = &kernel.state().particles;
    let max_diameter = 2.0 * p.max_radius().unwrap_or(0.002);
    let measured = analytical::heap_angle(&p.position, &p.radius, 0.0, max_diameter)
        .expect("No heap formed");
    let reference = analytical::repose_angle_estimate(friction);
    let error = (measured - reference).abs();

    println!("\nAngle of Repose Benchmark Results:");
    println!("  Spheres = {}", p.len());
    println!("  Simulated time = {:.3} s ({} steps)", summary.time, summary.steps);
    println!("  Friction = {:.2}", friction);
    println!("  Measured angle = {:.1} deg", measured);
    println!("  atan(mu) = {:.1} deg", reference);
    println!("  Difference = {:.1} deg (threshold: 3 deg)", error);

    assert!(error <= 3.0, "Heap angle {measured:.1} deg differs from {reference:.1} deg");
}

// ---------------------------------------------------------------------------
// Silo discharge (Beverloo)
// ---------------------------------------------------------------------------

const SILO_OUTLET_Y: f64 = 0.1;
const SILO_OUTLET_DIAMETER: f64 = 0.03;

const SILO_SCENE: &str = r#"{
    "name": "silo",
    "geometry": {"type": "compound", "parts": [
        {"type": "silo", "outlet_center": [0, 0.1, 0], "outlet_radius": 0.015,
         "radius": 0.04, "height": 0.2, "segments": 32},
        {"type": "floor", "center": [0, 0, 0], "half_size": 0.15}
    ]},
    "materials": [{
        "name": "sand", "youngs_modulus": 5.0e7, "poisson_ratio": 0.3,
        "density": 2650.0, "restitution": 0.5, "friction": 0.5,
        "wall_friction": 0.3, "rolling_friction": 0.05
    }],
    "sources": [{
        "material": "sand",
        "kind": {
            "type": "volume_fill",
            "region": {"min": [-0.025, 0.11, -0.025], "max": [0.025, 0.27, 0.025]},
            "target_count": 3000,
            "arrangement": "lattice"
        },
        "size": {"type": "uniform", "min": 0.0018, "max": 0.0024}
    }],
    "duration": 2.0,
    "output_stride": 5000,
    "domain": {"min": [-0.15, -0.05, -0.15], "max": [0.15, 0.35, 0.15]},
    "seed": 42
}"#;

/// Silo discharge benchmark.
///
/// A flat-bottomed silo drains through a central outlet while the mass that
/// has passed the outlet plane is sampled. The steady discharge rate, fitted
/// between 20% and 80% of the discharged mass, must be within 15% of the
/// Beverloo correlation.
#[test]
#[ignore]
fn benchmark_silo_discharge() {
    init_logging();

    let config = SceneConfig::from_json(SILO_SCENE).expect("Invalid silo scene");
    let scene = Scene::assemble(&config, Path::new(".")).expect("Failed to assemble silo scene");
    let (mut kernel, mut factory) = scene.build_kernel(Parallel::new()).expect("Failed to build kernel");

    let sample_every = 200;

    let p = &kernel.state().particles;
    let spheres = p.len();
    let total_mass: f64 = p.mass.iter().sum();
    let mean_diameter = 2.0 * p.radius.iter().sum::<f64>() / spheres.max(1) as f64;
    let density = config.materials[0].density;

    let mut samples: Vec<(f64, f64)> = Vec::new();
    for step in 0..scene.total_steps() {
        factory.inject(kernel.state_mut());
        kernel.step().expect("Silo step failed");
        if step % sample_every == 0 {
            let state = kernel.state();
            let below: f64 = state
                .particles
                .position
                .iter()
                .zip(&state.particles.mass)
                .filter(|(x, _)| x.y < SILO_OUTLET_Y)
                .map(|(_, m)| m)
                .sum();
            samples.push((state.time, below));
        }
        if step % 20_000 == 0 {
            tracing::info!("Silo step {}, t={:.4}s", step, kernel.state().time);
        }
    }

    let discharged = samples.last().map(|s| s.1).unwrap_or(0.0);
    let steady: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|&(_, m)| m >= 0.2 * discharged && m <= 0.8 * discharged)
        .collect();
    let measured = analytical::linear_slope(&steady).expect("Not enough discharge samples");
    let reference =
        BeverlooFlow::spheres(density, 0.6, 9.81).mass_flow_rate(SILO_OUTLET_DIAMETER, mean_diameter);
    let error = (measured - reference).abs() / reference;

    println!("\nSilo Discharge Benchmark Results:");
    println!("  Spheres = {}", spheres);
    println!("  Total mass = {:.4} kg, discharged = {:.4} kg", total_mass, discharged);
    println!("  Mean particle diameter = {:.4} m", mean_diameter);
    println!("  Outlet diameter = {:.4} m", SILO_OUTLET_DIAMETER);
    println!("  {:>12} {:>12}", "t(s)", "mass(kg)");
    for (t, m) in steady.iter().step_by((steady.len() / 10).max(1)) {
        println!("  {:>12.4} {:>12.5}", t, m);
    }
    println!("  Measured rate = {:.4} kg/s", measured);
    println!("  Beverloo rate = {:.4} kg/s", reference);
    println!("  Error = {:.1}% (threshold: 15%)", error * 100.0);

    assert!(discharged > 0.5 * total_mass, "Silo did not drain: {discharged:.4} of {total_mass:.4} kg");
    assert!(error <= 0.15, "Discharge rate {measured:.4} kg/s vs Beverloo {reference:.4} kg/s");
}

#[test]
fn test_heap_scene_is_valid() {
    let config = SceneConfig::from_json(HEAP_SCENE).unwrap();
    let scene = Scene::assemble(&config, Path::new(".")).unwrap();
    assert_eq!(scene.estimate().peak_bodies, 4000);
    assert_eq!(scene.walls().len(), 2);
    assert!(DVec3::Y.dot(scene.walls().triangles()[0].normal) > 0.99);
}

#[test]
fn test_silo_scene_is_valid() {
    let config = SceneConfig::from_json(SILO_SCENE).unwrap();
    let scene = Scene::assemble(&config, Path::new(".")).unwrap();
    assert_eq!(scene.estimate().peak_bodies, 3000);
    // 32 floor and 32 wall facets for the silo, two for the catch floor.
    assert_eq!(scene.walls().len(), 66);
    let outlet_floor = scene.walls().triangles().iter().filter(|t| t.normal.y > 0.99).count();
    assert_eq!(outlet_floor, 34);
}

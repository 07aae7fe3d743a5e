//! Sequential vs parallel backend parity.
//!
//! Runs the same stacked-column scenario through both backends and compares
//! final positions. The parallel reduction sums in a different order, so
//! agreement is checked at rounding level; two sequential runs must agree
//! bit for bit.

use std::sync::Arc;

use glam::DVec3;
use kernel::{
    BroadPhaseKind, DemKernel, ExecutionBackend, KernelSettings, Material, MaterialTable,
    Parallel, Sequential, SimulationKernel, SimulationState, WallMesh,
};

const RADIUS: f64 = 1e-3;
const STEPS: usize = 300;
const GRAVITY: f64 = 9.81;
const LAYERS: usize = 4;
const COLUMNS: usize = 4;

fn floor() -> Arc<WallMesh> {
    let mesh = WallMesh::from_triangles([
        [
            DVec3::new(-0.1, 0.0, -0.1),
            DVec3::new(-0.1, 0.0, 0.1),
            DVec3::new(0.1, 0.0, 0.1),
        ],
        [
            DVec3::new(-0.1, 0.0, -0.1),
            DVec3::new(0.1, 0.0, 0.1),
            DVec3::new(0.1, 0.0, -0.1),
        ],
    ])
    .unwrap();
    Arc::new(mesh)
}

fn bead() -> Material {
    Material {
        name: "bead".into(),
        youngs_modulus: 6.0e7,
        poisson_ratio: 0.25,
        density: 2500.0,
        restitution: 0.7,
        friction: 0.5,
        wall_friction: 0.5,
        rolling_friction: 0.05,
    }
}

/// Hertz overlap carrying `load` for effective modulus and radius.
fn static_overlap(load: f64, modulus: f64, radius: f64) -> f64 {
    (3.0 * load / (4.0 * modulus * radius.sqrt())).powf(2.0 / 3.0)
}

/// 4 x 4 grid of four-bead columns standing on the floor. Every contact
/// starts at the overlap that carries the weight above it, and a small
/// per-bead velocity and spin field shears the contacts so the tangential
/// and rolling terms are exercised while all contacts persist.
fn stacked_columns() -> SimulationState {
    let m = bead();
    let nu = m.poisson_ratio;
    let mass = m.density * 4.0 / 3.0 * std::f64::consts::PI * RADIUS.powi(3);
    let wall_modulus = m.youngs_modulus / (1.0 - nu * nu);
    let pair_modulus = 0.5 * wall_modulus;

    let table = MaterialTable::new(vec![m]).unwrap();
    let mut state = SimulationState::new(Arc::new(table), floor(), DVec3::new(0.0, -GRAVITY, 0.0), 2e-6);
    let weight = mass * GRAVITY;
    let pitch = 2.5 * RADIUS;
    let mut k = 0.0_f64;
    for ix in 0..COLUMNS {
        for iz in 0..COLUMNS {
            // Offset in x keeps the columns off the floor's diagonal edge.
            let (x, z) = (0.4 * RADIUS + ix as f64 * pitch, iz as f64 * pitch);
            let mut y = RADIUS - static_overlap(LAYERS as f64 * weight, wall_modulus, RADIUS);
            for layer in 0..LAYERS {
                let v = DVec3::new(k.sin(), 0.0, (3.0 * k).cos()) * 1e-3;
                let i = state.particles.len();
                state.particles.push_sphere(DVec3::new(x, y, z), v, RADIUS, 0, 2500.0);
                state.particles.angular_velocity[i] = DVec3::new((2.0 * k).cos(), 0.0, k.cos()) * 0.5;
                k += 1.0;

                let above = (LAYERS - 1 - layer) as f64 * weight;
                y += 2.0 * RADIUS - static_overlap(above, pair_modulus, 0.5 * RADIUS);
            }
        }
    }
    state
}

fn run<B: ExecutionBackend>(backend: B, broad_phase: BroadPhaseKind) -> SimulationState {
    let settings = KernelSettings {
        broad_phase,
        ..KernelSettings::default()
    };
    let mut kernel = DemKernel::new(stacked_columns(), settings, backend).unwrap();
    for _ in 0..STEPS {
        kernel.step().unwrap();
    }
    // One floor contact and three bead contacts per column.
    let expected = COLUMNS * COLUMNS * LAYERS;
    assert!(
        kernel.contact_count() >= expected - 4,
        "{} of {expected} contacts left after {STEPS} steps",
        kernel.contact_count()
    );
    kernel.into_state()
}

fn max_position_difference(a: &SimulationState, b: &SimulationState) -> f64 {
    assert_eq!(a.particles.len(), b.particles.len());
    a.particles
        .position
        .iter()
        .zip(&b.particles.position)
        .map(|(x, y)| (*x - *y).length())
        .fold(0.0, f64::max)
}

#[test]
fn parallel_matches_sequential() {
    let seq = run(Sequential, BroadPhaseKind::Grid);
    let par = run(Parallel::with_threads(4).unwrap(), BroadPhaseKind::Grid);
    let diff = max_position_difference(&seq, &par);
    println!("max position difference: {diff:e} m");
    assert!(diff < 1e-12, "backends diverged by {diff:e} m");
    assert_eq!(seq.history.len(), par.history.len());
}

#[test]
fn sequential_is_bit_reproducible() {
    let a = run(Sequential, BroadPhaseKind::Auto);
    let b = run(Sequential, BroadPhaseKind::Auto);
    assert_eq!(a.particles.position, b.particles.position);
    assert_eq!(a.particles.velocity, b.particles.velocity);
    assert_eq!(a.particles.angular_velocity, b.particles.angular_velocity);
}

#[test]
fn grid_and_tree_agree() {
    let grid = run(Sequential, BroadPhaseKind::Grid);
    let tree = run(Sequential, BroadPhaseKind::Tree);
    let diff = max_position_difference(&grid, &tree);
    assert!(diff < 1e-12, "broad phases diverged by {diff:e} m");
}

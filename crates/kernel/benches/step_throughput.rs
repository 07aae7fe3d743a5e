//! Step throughput of the two backends at increasing particle counts.
//!
//! Run with: cargo bench -p kernel --bench step_throughput

use std::sync::Arc;
use std::time::Instant;

use glam::DVec3;
use kernel::{
    DemKernel, ExecutionBackend, KernelSettings, Material, MaterialTable, Parallel, Sequential,
    SimulationKernel, SimulationState, WallMesh,
};

const RADIUS: f64 = 1e-3;

fn packed_cube(target_count: usize) -> SimulationState {
    let table = MaterialTable::new(vec![Material {
        name: "bead".into(),
        youngs_modulus: 6.0e7,
        poisson_ratio: 0.25,
        density: 2500.0,
        restitution: 0.7,
        friction: 0.5,
        wall_friction: 0.5,
        rolling_friction: 0.0,
    }])
    .unwrap();
    let mut state = SimulationState::new(Arc::new(table), Arc::new(WallMesh::empty()), DVec3::ZERO, 2e-6);
    let n_per_axis = (target_count as f64).cbrt().ceil() as usize;
    let spacing = 1.99 * RADIUS;
    for ix in 0..n_per_axis {
        for iy in 0..n_per_axis {
            for iz in 0..n_per_axis {
                let p = DVec3::new(ix as f64, iy as f64, iz as f64) * spacing;
                state.particles.push_sphere(p, DVec3::ZERO, RADIUS, 0, 2500.0);
            }
        }
    }
    state
}

fn time_steps<B: ExecutionBackend>(backend: B, count: usize, steps: usize) -> (f64, usize) {
    let mut kernel = DemKernel::new(packed_cube(count), KernelSettings::default(), backend).unwrap();
    kernel.step().unwrap();
    let start = Instant::now();
    for _ in 0..steps {
        kernel.step().unwrap();
    }
    (start.elapsed().as_secs_f64() / steps as f64, kernel.contact_count())
}

fn main() {
    println!("{:>9} {:>9} {:>14} {:>14} {:>8}", "spheres", "contacts", "seq ms/step", "par ms/step", "speedup");
    for count in [1_000, 8_000, 27_000, 64_000] {
        let steps = (200_000 / count).clamp(5, 100);
        let (seq, contacts) = time_steps(Sequential, count, steps);
        let (par, _) = time_steps(Parallel::new(), count, steps);
        println!(
            "{count:>9} {contacts:>9} {:>14.3} {:>14.3} {:>8.2}",
            seq * 1e3,
            par * 1e3,
            seq / par
        );
    }
}

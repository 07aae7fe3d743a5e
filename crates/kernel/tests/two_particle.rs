//! Two-sphere head-on collision.
//!
//! Verifies Newton's 3rd law on the contact force, momentum conservation
//! through the impact, and that the rebound speed follows the configured
//! restitution coefficient.

use std::sync::Arc;

use glam::DVec3;
use kernel::{
    DemKernel, KernelSettings, Material, MaterialTable, Sequential, SimulationKernel,
    SimulationState, WallMesh,
};

const RADIUS: f64 = 1e-3;
const DENSITY: f64 = 2500.0;

fn material(restitution: f64) -> Material {
    Material {
        name: "bead".into(),
        youngs_modulus: 6.0e7,
        poisson_ratio: 0.25,
        density: DENSITY,
        restitution,
        friction: 0.3,
        wall_friction: 0.3,
        rolling_friction: 0.0,
    }
}

/// Two beads `gap` apart approaching each other at `speed` each.
fn setup(restitution: f64, gap: f64, speed: f64) -> DemKernel<Sequential> {
    let table = MaterialTable::new(vec![material(restitution)]).unwrap();
    let mut state = SimulationState::new(Arc::new(table), Arc::new(WallMesh::empty()), DVec3::ZERO, 1e-6);
    let x = RADIUS + 0.5 * gap;
    state
        .particles
        .push_sphere(DVec3::new(-x, 0.0, 0.0), DVec3::new(speed, 0.0, 0.0), RADIUS, 0, DENSITY);
    state
        .particles
        .push_sphere(DVec3::new(x, 0.0, 0.0), DVec3::new(-speed, 0.0, 0.0), RADIUS, 0, DENSITY);
    DemKernel::new(state, KernelSettings::default(), Sequential).unwrap()
}

#[test]
fn forces_equal_and_opposite() {
    // Start slightly overlapped so the first force pass has a contact.
    let mut kernel = setup(0.9, -2e-6, 0.05);
    kernel.step().unwrap();

    let p = &kernel.state().particles;
    let (f0, f1) = (p.force[0], p.force[1]);
    assert!(f0.x < 0.0, "left bead should be pushed back, got {f0}");
    assert_eq!(f0, -f1, "forces not equal and opposite: {f0} vs {f1}");

    // Head-on along x: no lateral component.
    let tol = 1e-12 * f0.length();
    assert!(f0.y.abs() <= tol && f0.z.abs() <= tol, "lateral force {f0}");
}

#[test]
fn momentum_conserved_through_impact() {
    let mut kernel = setup(0.9, 2e-5, 0.1);
    let momentum = |k: &DemKernel<Sequential>| {
        let p = &k.state().particles;
        (0..p.len()).map(|i| p.mass[i] * p.velocity[i]).sum::<DVec3>()
    };
    let scale = kernel.state().particles.mass[0] * 0.1;

    for _ in 0..600 {
        kernel.step().unwrap();
        let m = momentum(&kernel);
        assert!(m.length() < 1e-9 * scale, "momentum drifted to {m}");
    }
}

/// Run one collision and return the measured restitution.
fn measured_restitution(e: f64) -> f64 {
    let speed = 0.1;
    let mut kernel = setup(e, 2e-5, speed);
    let mut touched = false;
    for _ in 0..2000 {
        kernel.step().unwrap();
        touched |= kernel.contact_count() > 0;
        if touched && kernel.contact_count() == 0 {
            break;
        }
    }
    assert!(touched, "beads never met");
    assert_eq!(kernel.contact_count(), 0, "beads still in contact");
    assert!(kernel.state().history.is_empty(), "history survived separation");

    let p = &kernel.state().particles;
    (p.velocity[1].x - p.velocity[0].x) / (2.0 * speed)
}

#[test]
fn rebound_follows_restitution() {
    let mut previous = 0.0;
    for e in [0.3, 0.5, 0.9] {
        let measured = measured_restitution(e);
        assert!((measured - e).abs() < 0.03 * e, "restitution {e}: measured {measured}");
        assert!(measured > previous);
        previous = measured;
    }
}

//! Rigid clump motion.
//!
//! A torque-free clump must conserve angular momentum and kinetic energy
//! while its angular velocity precesses; a dumbbell landing on one end must
//! pick up spin from the off-centre contact.

use std::sync::Arc;

use glam::{DQuat, DVec3};
use kernel::{
    ClumpSphere, DemKernel, KernelSettings, Material, MaterialTable, Sequential,
    SimulationKernel, SimulationState, WallMesh,
};

fn table() -> Arc<MaterialTable> {
    Arc::new(
        MaterialTable::new(vec![Material {
            name: "grain".into(),
            youngs_modulus: 6.0e7,
            poisson_ratio: 0.25,
            density: 2500.0,
            restitution: 0.5,
            friction: 0.4,
            wall_friction: 0.4,
            rolling_friction: 0.0,
        }])
        .unwrap(),
    )
}

fn asymmetric() -> Vec<ClumpSphere> {
    vec![
        ClumpSphere { offset: DVec3::new(0.0, 0.0, 0.0), radius: 1.0e-3 },
        ClumpSphere { offset: DVec3::new(1.2e-3, 0.0, 0.0), radius: 0.8e-3 },
        ClumpSphere { offset: DVec3::new(0.0, 0.9e-3, 0.4e-3), radius: 0.6e-3 },
    ]
}

#[test]
fn torque_free_rotation_conserves_momentum() {
    let mut state = SimulationState::new(table(), Arc::new(WallMesh::empty()), DVec3::ZERO, 1e-5);
    let c = state.clumps.spawn(
        &mut state.particles,
        &asymmetric(),
        DVec3::ZERO,
        DQuat::from_rotation_y(0.3),
        DVec3::ZERO,
        0,
        2500.0,
    );
    state.clumps.iter_mut().for_each(|b| b.angular_velocity = DVec3::new(3.0, 10.0, 1.0));

    let mut kernel = DemKernel::new(state, KernelSettings::default(), Sequential).unwrap();
    let measure = |k: &DemKernel<Sequential>| {
        let body = k.state().clumps.get(c).unwrap();
        (body.world_inertia() * body.angular_velocity, body.kinetic_energy())
    };
    let (l0, e0) = measure(&kernel);
    let w0 = kernel.state().clumps.get(c).unwrap().angular_velocity;

    for _ in 0..2000 {
        kernel.step().unwrap();
    }
    let (l1, e1) = measure(&kernel);
    let w1 = kernel.state().clumps.get(c).unwrap().angular_velocity;

    assert!((l1 - l0).length() < 1e-3 * l0.length(), "L drifted: {l0} -> {l1}");
    assert!((e1 - e0).abs() < 1e-3 * e0, "energy drifted: {e0} -> {e1}");
    assert!((w1 - w0).length() > 1e-3, "angular velocity should precess");

    // Constituents stay rigidly attached.
    let body = kernel.state().clumps.get(c).unwrap();
    let p = &kernel.state().particles;
    let d01 = (p.position[body.spheres.start] - p.position[body.spheres.start + 1]).length();
    assert!((d01 - 1.2e-3).abs() < 1e-12, "constituent spacing {d01}");
}

#[test]
fn off_centre_landing_induces_spin() {
    let floor = WallMesh::from_triangles([
        [DVec3::new(-1.0, 0.0, -1.0), DVec3::new(-1.0, 0.0, 1.0), DVec3::new(1.0, 0.0, 1.0)],
        [DVec3::new(-1.0, 0.0, -1.0), DVec3::new(1.0, 0.0, 1.0), DVec3::new(1.0, 0.0, -1.0)],
    ])
    .unwrap();
    let mut state = SimulationState::new(table(), Arc::new(floor), DVec3::new(0.0, -9.81, 0.0), 2e-6);
    let dumbbell = [
        ClumpSphere { offset: DVec3::new(-1.5e-3, 0.0, 0.0), radius: 1.0e-3 },
        ClumpSphere { offset: DVec3::new(1.5e-3, 0.0, 0.0), radius: 1.0e-3 },
    ];
    // Tilted 30 degrees about z so the +x end is lowest.
    let tilt = DQuat::from_rotation_z(-std::f64::consts::FRAC_PI_6);
    let low_end = 1.5e-3 * 0.5 + 1.0e-3;
    state.clumps.spawn(
        &mut state.particles,
        &dumbbell,
        DVec3::new(0.0, low_end + 1e-5, 0.0),
        tilt,
        DVec3::new(0.0, -0.1, 0.0),
        0,
        2500.0,
    );

    let mut kernel = DemKernel::new(state, KernelSettings::default(), Sequential).unwrap();
    let mut max_spin: f64 = 0.0;
    for _ in 0..3000 {
        kernel.step().unwrap();
        let body = kernel.state().clumps.get(0).unwrap();
        max_spin = max_spin.max(body.angular_velocity.z.abs());
        let p = &kernel.state().particles;
        for s in body.spheres.clone() {
            assert!(p.position[s].y > 0.8 * p.radius[s], "sphere {s} sank into the floor");
        }
    }
    assert!(max_spin > 1.0, "impact on one end produced no spin ({max_spin} rad/s)");
}

//! Velocity-Verlet helpers and the Rayleigh critical timestep.
//!
//! The stepping order (kick, drift, force pass, kick) lives in
//! [`DemKernel::step`](crate::DemKernel); this module holds the per-body
//! update rules and the timestep bound.

use std::f64::consts::PI;

use glam::{DQuat, DVec3};

use crate::clump::Clump;
use crate::error::ConfigError;
use crate::material::{MaterialId, MaterialTable};

/// Default fraction of the critical timestep used as the working step.
pub const DEFAULT_SAFETY_FRACTION: f64 = 0.2;

/// Rayleigh-wave timestep: pi r sqrt(rho / G) / (0.1631 nu + 0.8766).
pub fn rayleigh_timestep(radius: f64, density: f64, shear_modulus: f64, poisson_ratio: f64) -> f64 {
    PI * radius * (density / shear_modulus).sqrt() / (0.1631 * poisson_ratio + 0.8766)
}

/// Critical timestep over a material set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestepBound {
    /// Smallest Rayleigh timestep found.
    pub critical: f64,
    /// Material that produced it.
    pub material: MaterialId,
    /// Radius that produced it.
    pub radius: f64,
}

impl TimestepBound {
    /// Minimum Rayleigh timestep over `(material, smallest radius)` pairs.
    /// Returns `None` when `radii` is empty.
    pub fn from_radii<I>(materials: &MaterialTable, radii: I) -> Option<Self>
    where
        I: IntoIterator<Item = (MaterialId, f64)>,
    {
        radii
            .into_iter()
            .filter_map(|(id, radius)| {
                let m = materials.get(id)?;
                Some(TimestepBound {
                    critical: m.rayleigh_timestep(radius),
                    material: id,
                    radius,
                })
            })
            .min_by(|a, b| a.critical.total_cmp(&b.critical))
    }

    /// Working step: the requested one if it does not exceed the critical
    /// value, otherwise an error. `None` yields `safety * critical`.
    pub fn resolve(&self, requested: Option<f64>, safety: f64) -> Result<f64, ConfigError> {
        match requested {
            None => Ok(safety * self.critical),
            Some(dt) if !(dt.is_finite() && dt > 0.0) => Err(ConfigError::InvalidTimestep(dt)),
            Some(dt) if dt > self.critical => Err(ConfigError::TimestepTooLarge {
                timestep: dt,
                critical: self.critical,
            }),
            Some(dt) => Ok(dt),
        }
    }
}

/// Half-kick for a free sphere.
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn kick_sphere(
    velocity: &mut DVec3,
    angular_velocity: &mut DVec3,
    force: DVec3,
    torque: DVec3,
    mass: f64,
    inertia: f64,
    gravity: DVec3,
    half_dt: f64,
) {
    *velocity += (force / mass + gravity) * half_dt;
    *angular_velocity += torque / inertia * half_dt;
}

/// Half-kick for a clump, using its reduced force and torque. The angular
/// update includes the gyroscopic term: dw/dt = I_w^-1 (T - w x I_w w).
pub fn kick_clump(clump: &mut Clump, gravity: DVec3, half_dt: f64) {
    clump.velocity += (clump.force / clump.mass + gravity) * half_dt;
    let i_world = clump.world_inertia();
    let w = clump.angular_velocity;
    let gyro = w.cross(i_world * w);
    clump.angular_velocity += clump.world_inv_inertia() * (clump.torque - gyro) * half_dt;
}

/// Drift a clump: translate, then rotate by the exponential map and
/// renormalise.
pub fn drift_clump(clump: &mut Clump, dt: f64) {
    clump.position += clump.velocity * dt;
    let delta = DQuat::from_scaled_axis(clump.angular_velocity * dt);
    clump.orientation = (delta * clump.orientation).normalize();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;

    fn table() -> MaterialTable {
        MaterialTable::new(vec![Material {
            name: "glass".into(),
            youngs_modulus: 6.0e10,
            poisson_ratio: 0.25,
            density: 2500.0,
            restitution: 0.9,
            friction: 0.3,
            wall_friction: 0.3,
            rolling_friction: 0.0,
        }])
        .unwrap()
    }

    #[test]
    fn rayleigh_formula() {
        let g = 2.4e10;
        let dt = rayleigh_timestep(1e-3, 2500.0, g, 0.25);
        let expected = PI * 1e-3 * (2500.0_f64 / g).sqrt() / (0.1631 * 0.25 + 0.8766);
        assert!((dt - expected).abs() / expected < 1e-9);
        // About 1.1e-6 s for a 1 mm glass bead with E = 60 GPa.
        assert!(dt > 1e-6 && dt < 1.2e-6, "dt = {dt}");
    }

    #[test]
    fn smallest_radius_wins() {
        let bound = TimestepBound::from_radii(&table(), [(0, 2e-3), (0, 1e-3)]).unwrap();
        assert_eq!(bound.radius, 1e-3);
        assert!(TimestepBound::from_radii(&table(), []).is_none());
    }

    #[test]
    fn twice_critical_is_rejected() {
        let bound = TimestepBound::from_radii(&table(), [(0, 1e-3)]).unwrap();
        let err = bound.resolve(Some(2.0 * bound.critical), 0.2).unwrap_err();
        assert!(matches!(err, ConfigError::TimestepTooLarge { .. }));
        assert!(matches!(bound.resolve(Some(-1.0), 0.2), Err(ConfigError::InvalidTimestep(_))));
        let dt = bound.resolve(None, 0.2).unwrap();
        assert!((dt - 0.2 * bound.critical).abs() < 1e-20);
        assert_eq!(bound.resolve(Some(0.5 * bound.critical), 0.2).unwrap(), 0.5 * bound.critical);
    }

    #[test]
    fn sphere_kick_applies_gravity() {
        let mut v = DVec3::ZERO;
        let mut w = DVec3::ZERO;
        kick_sphere(&mut v, &mut w, DVec3::ZERO, DVec3::Z, 2.0, 0.5, DVec3::new(0.0, -9.81, 0.0), 0.5);
        assert!((v.y + 4.905).abs() < 1e-12);
        assert!((w.z - 1.0).abs() < 1e-12);
    }
}

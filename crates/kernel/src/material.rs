//! Material parameters and the precomputed pairwise contact table.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::MaterialError;

/// Index of a material inside a [`MaterialTable`].
pub type MaterialId = usize;

/// Elastic and frictional properties of one particle material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Unique name used by scene files.
    pub name: String,
    /// Young's modulus E (Pa).
    pub youngs_modulus: f64,
    /// Poisson ratio.
    pub poisson_ratio: f64,
    /// Solid density (kg/m^3).
    pub density: f64,
    /// Coefficient of restitution in (0, 1].
    pub restitution: f64,
    /// Particle-particle sliding friction.
    pub friction: f64,
    /// Particle-wall sliding friction.
    #[serde(default = "default_wall_friction")]
    pub wall_friction: f64,
    /// Rolling friction coefficient (dimensionless).
    #[serde(default)]
    pub rolling_friction: f64,
}

fn default_wall_friction() -> f64 {
    0.5
}

impl Material {
    /// Shear modulus G = E / (2(1 + nu)).
    #[inline]
    pub fn shear_modulus(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poisson_ratio))
    }

    /// Sphere mass for this material.
    #[inline]
    pub fn sphere_mass(&self, radius: f64) -> f64 {
        self.density * 4.0 / 3.0 * PI * radius.powi(3)
    }

    /// Rayleigh-wave critical timestep for a sphere of `radius`.
    pub fn rayleigh_timestep(&self, radius: f64) -> f64 {
        crate::integrator::rayleigh_timestep(
            radius,
            self.density,
            self.shear_modulus(),
            self.poisson_ratio,
        )
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<(), MaterialError> {
        let name = || self.name.clone();
        if !(self.youngs_modulus.is_finite() && self.youngs_modulus > 0.0) {
            return Err(MaterialError::NonPositiveModulus {
                material: name(),
                value: self.youngs_modulus,
            });
        }
        if !(self.poisson_ratio > -1.0 && self.poisson_ratio < 0.5) {
            return Err(MaterialError::PoissonOutOfRange {
                material: name(),
                value: self.poisson_ratio,
            });
        }
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(MaterialError::NonPositiveDensity {
                material: name(),
                value: self.density,
            });
        }
        if !(self.restitution > 0.0 && self.restitution <= 1.0) {
            return Err(MaterialError::RestitutionOutOfRange {
                material: name(),
                value: self.restitution,
            });
        }
        for (field, value) in [
            ("friction", self.friction),
            ("wall_friction", self.wall_friction),
            ("rolling_friction", self.rolling_friction),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MaterialError::NegativeCoefficient {
                    material: name(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Damping ratio |beta| that makes a clamped Hertz contact rebound with
/// `restitution`.
///
/// Fitted by bisection on [`clamped_restitution`]; ln(e) / sqrt(ln(e)^2 +
/// pi^2) undershoots once the normal force cannot pull. The result does not
/// depend on impact speed, stiffness or mass.
pub fn damping_ratio(restitution: f64) -> f64 {
    if restitution >= 1.0 {
        return 0.0;
    }
    let target = restitution.max(1e-4);
    let mut hi = 1.0;
    while clamped_restitution(hi) > target && hi < 1e4 {
        hi *= 2.0;
    }
    let mut lo = 0.0;
    for _ in 0..40 {
        let mid = 0.5 * (lo + hi);
        if clamped_restitution(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Restitution of a Hertz contact with damping ratio `beta` and the normal
/// force clamped to >= 0.
///
/// Integrates the dimensionless overlap equation
/// x'' = -max(x^1.5 + sqrt(5) beta x^0.25 x', 0) from x = 0, x' = 1 with
/// RK4 until the overlap closes again. sqrt(5) is 2 sqrt(5/6) times the
/// sqrt(3/2) left over from scaling S_n against the elastic stiffness.
pub fn clamped_restitution(beta: f64) -> f64 {
    const H: f64 = 2e-3;
    const MAX_STEPS: usize = 50_000;
    let alpha = 5f64.sqrt() * beta;
    let accel = |x: f64, v: f64| {
        let x = x.max(0.0);
        -(x.powf(1.5) + alpha * x.powf(0.25) * v).max(0.0)
    };

    let (mut x, mut v) = (0.0_f64, 1.0_f64);
    for _ in 0..MAX_STEPS {
        let (k1x, k1v) = (v, accel(x, v));
        let (k2x, k2v) = (v + 0.5 * H * k1v, accel(x + 0.5 * H * k1x, v + 0.5 * H * k1v));
        let (k3x, k3v) = (v + 0.5 * H * k2v, accel(x + 0.5 * H * k2x, v + 0.5 * H * k2v));
        let (k4x, k4v) = (v + H * k3v, accel(x + H * k3x, v + H * k3v));
        let x_next = x + H / 6.0 * (k1x + 2.0 * k2x + 2.0 * k3x + k4x);
        let v_next = v + H / 6.0 * (k1v + 2.0 * k2v + 2.0 * k3v + k4v);
        if x_next <= 0.0 {
            let frac = x / (x - x_next);
            return -(v + frac * (v_next - v)).min(0.0);
        }
        x = x_next;
        v = v_next;
    }
    // Heavily damped contacts creep out; report the exit speed so far.
    (-v).max(0.0)
}

//! Analytical reference solutions for DEM validation.
//!
//! Closed-form results against which simulated trajectories and bulk flow
//! measurements are compared.

use glam::DVec3;

/// Height of a body in free fall after `t` seconds.
///
/// ```text
/// y(t) = y0 + v0 t - g t^2 / 2
/// ```
pub fn free_fall_height(y0: f64, v0: f64, gravity: f64, t: f64) -> f64 {
    y0 + v0 * t - 0.5 * gravity * t * t
}

/// Vertical velocity of a body in free fall after `t` seconds.
pub fn free_fall_velocity(v0: f64, gravity: f64, t: f64) -> f64 {
    v0 - gravity * t
}

/// Speed at impact after falling `height` from rest.
pub fn impact_speed(height: f64, gravity: f64) -> f64 {
    (2.0 * gravity * height).sqrt()
}

/// Apex of the first bounce after a drop from `height` onto a rigid floor
/// with coefficient of restitution `e`.
///
/// The rebound speed is `e` times the impact speed, so the apex height
/// scales with `e^2`.
pub fn rebound_height(height: f64, restitution: f64) -> f64 {
    restitution * restitution * height
}

/// Rayleigh-wave critical timestep for a sphere of `radius`.
///
/// ```text
/// dt_R = pi r sqrt(rho / G) / (0.1631 nu + 0.8766),   G = E / (2 (1 + nu))
/// ```
pub fn rayleigh_critical_timestep(radius: f64, density: f64, youngs_modulus: f64, poisson_ratio: f64) -> f64 {
    let shear_modulus = youngs_modulus / (2.0 * (1.0 + poisson_ratio));
    std::f64::consts::PI * radius * (density / shear_modulus).sqrt() / (0.1631 * poisson_ratio + 0.8766)
}

/// Beverloo correlation for the discharge rate of a flat-bottomed silo.
///
/// ```text
/// W = C rho_b sqrt(g) (D - k d)^(5/2)
/// ```
///
/// where `D` is the outlet diameter and `d` the particle diameter.
#[derive(Debug, Clone)]
pub struct BeverlooFlow {
    /// Bulk density of the packing (kg/m^3)
    pub bulk_density: f64,
    /// Gravitational acceleration (m/s^2)
    pub gravity: f64,
    /// Discharge coefficient C
    pub discharge_coefficient: f64,
    /// Empty annulus coefficient k
    pub shape_coefficient: f64,
}

impl BeverlooFlow {
    /// Typical coefficients for spheres: C = 0.58, k = 1.5.
    pub fn spheres(particle_density: f64, packing_fraction: f64, gravity: f64) -> Self {
        Self {
            bulk_density: particle_density * packing_fraction,
            gravity,
            discharge_coefficient: 0.58,
            shape_coefficient: 1.5,
        }
    }

    /// Mass flow rate (kg/s); zero when the outlet is too small to flow.
    pub fn mass_flow_rate(&self, outlet_diameter: f64, particle_diameter: f64) -> f64 {
        let effective = outlet_diameter - self.shape_coefficient * particle_diameter;
        if effective <= 0.0 {
            return 0.0;
        }
        self.discharge_coefficient * self.bulk_density * self.gravity.sqrt() * effective.powf(2.5)
    }
}

/// Rough angle of repose of a poured heap, `atan(mu)`, in degrees.
pub fn repose_angle_estimate(friction: f64) -> f64 {
    friction.atan().to_degrees()
}

/// Slope of a conical heap in degrees.
///
/// The height is taken from the highest sphere top above `floor_y`, the
/// base radius from the furthest sphere (horizontally from the heap axis)
/// whose centre lies within `base_band` of the floor.
pub fn heap_angle(centres: &[DVec3], radii: &[f64], floor_y: f64, base_band: f64) -> Option<f64> {
    if centres.is_empty() || centres.len() != radii.len() {
        return None;
    }
    let n = centres.len() as f64;
    let axis = centres.iter().copied().sum::<DVec3>() / n;

    let height = centres
        .iter()
        .zip(radii)
        .map(|(c, r)| c.y + r - floor_y)
        .fold(0.0_f64, f64::max);
    let base = centres
        .iter()
        .filter(|c| c.y - floor_y <= base_band)
        .map(|c| ((c.x - axis.x).powi(2) + (c.z - axis.z).powi(2)).sqrt())
        .fold(0.0_f64, f64::max);

    if base <= 0.0 || height <= 0.0 {
        return None;
    }
    Some((height / base).atan().to_degrees())
}

/// Least-squares slope of `(x, y)` samples.
pub fn linear_slope(samples: &[(f64, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|s| s.0).sum::<f64>() / n;
    let mean_y = samples.iter().map(|s| s.1).sum::<f64>() / n;
    let sxx: f64 = samples.iter().map(|s| (s.0 - mean_x).powi(2)).sum();
    let sxy: f64 = samples.iter().map(|s| (s.0 - mean_x) * (s.1 - mean_y)).sum();
    if sxx <= 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_fall_returns_to_start() {
        let g = 9.81;
        let v0 = 2.0;
        let t = 2.0 * v0 / g;
        assert!((free_fall_height(1.0, v0, g, t) - 1.0).abs() < 1e-12);
        assert!((free_fall_velocity(v0, g, t) + v0).abs() < 1e-12);
    }

    #[test]
    fn test_rebound_height_scales_with_restitution_squared() {
        assert!((rebound_height(0.1, 0.5) - 0.025).abs() < 1e-15);
        assert_eq!(rebound_height(0.1, 1.0), 0.1);
        let v = impact_speed(0.05, 9.81);
        assert!((v * v / (2.0 * 9.81) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_rayleigh_matches_kernel() {
        let (r, rho, e, nu) = (0.002, 2500.0, 6.0e7, 0.25);
        let ours = rayleigh_critical_timestep(r, rho, e, nu);
        let kernel = kernel::rayleigh_timestep(r, rho, e / (2.0 * (1.0 + nu)), nu);
        assert!((ours - kernel).abs() < 1e-15 * ours.max(1.0));
        // Order of magnitude for millimetre glass beads.
        assert!(ours > 1e-5 && ours < 1e-4, "dt_R = {ours}");
    }

    #[test]
    fn test_beverloo_scaling() {
        let flow = BeverlooFlow::spheres(2500.0, 0.6, 9.81);
        let d = 0.004;
        assert_eq!(flow.mass_flow_rate(1.5 * d, d), 0.0);
        let small = flow.mass_flow_rate(0.02, d);
        let large = flow.mass_flow_rate(0.04, d);
        let expected_ratio = ((0.04 - 1.5 * d) / (0.02 - 1.5 * d)).powf(2.5);
        assert!((large / small - expected_ratio).abs() < 1e-9);
    }

    #[test]
    fn test_repose_estimate() {
        assert!((repose_angle_estimate(1.0) - 45.0).abs() < 1e-12);
        assert!(repose_angle_estimate(0.5) < 30.0);
    }

    #[test]
    fn test_heap_angle_of_cone() {
        // Ring of base spheres at radius 0.1 plus an apex sphere 0.1 above.
        let r = 0.001;
        let mut centres: Vec<DVec3> = (0..8)
            .map(|k| {
                let a = std::f64::consts::TAU * k as f64 / 8.0;
                DVec3::new(0.1 * a.cos(), r, 0.1 * a.sin())
            })
            .collect();
        centres.push(DVec3::new(0.0, 0.1 - r, 0.0));
        let radii = vec![r; centres.len()];

        let angle = heap_angle(&centres, &radii, 0.0, 2.0 * r).unwrap();
        assert!((angle - 45.0).abs() < 1.0, "angle {angle}");
        assert!(heap_angle(&[], &[], 0.0, 0.01).is_none());
    }

    #[test]
    fn test_linear_slope() {
        let samples: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 3.0 * i as f64 + 1.0)).collect();
        assert!((linear_slope(&samples).unwrap() - 3.0).abs() < 1e-12);
        assert!(linear_slope(&samples[..1]).is_none());
    }
}

//! Hertz-Mindlin contact law with Coulomb sliding and rolling resistance.
//!
//! Normal: F_n = 4/3 E* sqrt(R*) d^1.5 - g_n v_n, clamped to >= 0.
//! Tangential: F_t = -k_t d_t - g_t v_t with k_t = 8 G* sqrt(R* d) and the
//! tangential displacement d_t carried in the contact history.
//! Damping: g = 2 sqrt(5/6) beta sqrt(S m*), S_n = 2 E* sqrt(R* d), S_t = k_t,
//! with beta fitted so the clamped normal force rebounds at the pair's e.

use glam::DVec3;

use crate::material::PairParameters;
use crate::narrow_phase::Contact;

const DAMPING_SCALE: f64 = 1.825_741_858_350_553_8; // 2 sqrt(5/6)

/// Mass properties the contact law needs beyond the geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactBodies {
    /// m* from the two body masses (single body mass against a wall).
    pub effective_mass: f64,
    /// Effective rotational inertia bounding the rolling torque.
    pub effective_inertia: f64,
}

impl ContactBodies {
    /// Combine two bodies. Pass `f64::INFINITY` for a static partner.
    pub fn combine(mass_a: f64, mass_b: f64, inertia_a: f64, inertia_b: f64) -> Self {
        let harmonic = |x: f64, y: f64| if y.is_infinite() { x } else { x * y / (x + y) };
        Self {
            effective_mass: harmonic(mass_a, mass_b),
            effective_inertia: harmonic(inertia_a, inertia_b),
        }
    }
}

/// Outcome of one contact evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactResponse {
    /// Force on body `b`; body `a` receives the negation.
    pub force: DVec3,
    /// Torque on `a` about its centre.
    pub torque_a: DVec3,
    /// Torque on `b` about its centre (unused for walls).
    pub torque_b: DVec3,
    /// Updated tangential displacement to store in the history.
    pub tangential_displacement: DVec3,
    /// Magnitude of the clamped normal force.
    pub normal_force: f64,
}

/// Timestep seen by one force pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTiming {
    /// Timestep, bounding the rolling torque.
    pub dt: f64,
    /// Interval over which tangential slip accumulates into the history.
    pub slip_dt: f64,
}

impl StepTiming {
    /// A regular pass after a drift of `dt`.
    pub fn step(dt: f64) -> Self {
        Self { dt, slip_dt: dt }
    }

    /// The pass at the initial positions: no time has elapsed, so stored
    /// displacements are not advanced.
    pub fn bootstrap(dt: f64) -> Self {
        Self { dt, slip_dt: 0.0 }
    }
}

/// Rotate the stored displacement into the current tangent plane, keeping
/// its magnitude.
#[inline]
pub fn rotate_history(previous: DVec3, normal: DVec3) -> DVec3 {
    let projected = previous - previous.dot(normal) * normal;
    let len = projected.length();
    if len > 0.0 {
        projected * (previous.length() / len)
    } else {
        DVec3::ZERO
    }
}

/// Evaluate one contact. `lever_a`/`lever_b` run from each centre to the
/// contact point; `history` is the stored displacement, if any.
pub fn evaluate(
    contact: &Contact,
    params: &PairParameters,
    bodies: ContactBodies,
    lever_a: DVec3,
    lever_b: DVec3,
    history: Option<DVec3>,
    timing: StepTiming,
) -> ContactResponse {
    let n = contact.normal;
    let overlap = contact.overlap;
    let r_eff = contact.effective_radius;
    let m_eff = bodies.effective_mass;
    let contact_radius = (r_eff * overlap).sqrt();

    // --- Normal ---
    let v_rel = contact.relative_velocity;
    let v_n = v_rel.dot(n);
    let s_n = 2.0 * params.effective_modulus * contact_radius;
    let gamma_n = DAMPING_SCALE * params.damping_ratio * (s_n * m_eff).sqrt();
    let elastic = 4.0 / 3.0 * params.effective_modulus * r_eff.sqrt() * overlap.powf(1.5);
    let f_n = (elastic - gamma_n * v_n).max(0.0);

    // --- Tangential ---
    let v_t = v_rel - v_n * n;
    let k_t = 8.0 * params.effective_shear_modulus * contact_radius;
    let gamma_t = DAMPING_SCALE * params.damping_ratio * (k_t * m_eff).sqrt();
    let mut delta_t = rotate_history(history.unwrap_or(DVec3::ZERO), n) + v_t * timing.slip_dt;
    let mut f_t = -k_t * delta_t - gamma_t * v_t;

    let max_f_t = params.friction * f_n;
    let f_t_mag = f_t.length();
    if f_t_mag > max_f_t {
        f_t *= if f_t_mag > 0.0 { max_f_t / f_t_mag } else { 0.0 };
        if k_t > 0.0 {
            delta_t = -(f_t + gamma_t * v_t) / k_t;
        }
    }

    let force = f_n * n + f_t;
    let mut torque_a = lever_a.cross(-force);
    let mut torque_b = lever_b.cross(force);

    // --- Rolling resistance ---
    let spin = contact.relative_spin;
    let spin_mag = spin.length();
    if params.rolling_friction > 0.0 && spin_mag > 0.0 && f_n > 0.0 {
        let limit = spin_mag * bodies.effective_inertia / timing.dt;
        let magnitude = (params.rolling_friction * r_eff * f_n).min(limit);
        let rolling = spin * (magnitude / spin_mag);
        torque_a -= rolling;
        torque_b += rolling;
    }

    ContactResponse {
        force,
        torque_a,
        torque_b,
        tangential_displacement: delta_t,
        normal_force: f_n,
    }
}

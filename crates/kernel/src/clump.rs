//! Rigid multi-sphere clumps.
//!
//! A clump is a record in [`ClumpArena`] that owns one rigid-body state plus a
//! contiguous index range of constituent spheres in the
//! [`ParticleStore`](crate::particle::ParticleStore). Contact detection sees the
//! constituents as ordinary spheres; before integration their forces are
//! reduced onto the clump centroid, and after integration their world state is
//! re-derived from the clump.

use std::ops::Range;

use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::material::MaterialId;
use crate::particle::{Body, ParticleStore};

/// Smallest and largest number of constituents a clump may have.
pub const CLUMP_SPHERE_RANGE: Range<usize> = 2..11;

/// One constituent sphere in a clump template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClumpSphere {
    /// Offset from the template origin.
    pub offset: DVec3,
    /// Sphere radius.
    pub radius: f64,
}

/// Mass properties of a set of spheres about their common centre of mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    /// Total mass.
    pub mass: f64,
    /// Centre of mass in the input frame.
    pub center: DVec3,
    /// Inertia tensor about `center`.
    pub inertia: DMat3,
}

/// Sum sphere masses and parallel-axis inertias. Overlap between
/// constituents is counted twice.
pub fn mass_properties(spheres: &[ClumpSphere], density: f64) -> MassProperties {
    let masses: Vec<f64> = spheres
        .iter()
        .map(|s| density * 4.0 / 3.0 * std::f64::consts::PI * s.radius.powi(3))
        .collect();
    let mass: f64 = masses.iter().sum();
    let center = spheres
        .iter()
        .zip(&masses)
        .fold(DVec3::ZERO, |acc, (s, &m)| acc + s.offset * m)
        / mass;

    let mut inertia = DMat3::ZERO;
    for (s, &m) in spheres.iter().zip(&masses) {
        let d = s.offset - center;
        let own = DMat3::from_diagonal(DVec3::splat(0.4 * m * s.radius * s.radius));
        let diag = DMat3::from_diagonal(DVec3::splat(d.length_squared()));
        let outer = DMat3::from_cols(d * d.x, d * d.y, d * d.z);
        inertia += own + (diag - outer) * m;
    }

    MassProperties {
        mass,
        center,
        inertia,
    }
}

/// Rigid aggregate of spheres.
#[derive(Debug, Clone)]
pub struct Clump {
    /// Centre of mass.
    pub position: DVec3,
    /// Body-to-world rotation.
    pub orientation: DQuat,
    /// Linear velocity of the centre of mass.
    pub velocity: DVec3,
    /// World-frame angular velocity.
    pub angular_velocity: DVec3,
    /// Total mass.
    pub mass: f64,
    /// Body-frame inertia tensor about the centre of mass.
    pub inertia: DMat3,
    /// Inverse of `inertia`.
    pub inv_inertia: DMat3,
    /// Body-frame offset of each constituent from the centre of mass.
    pub offsets: Vec<DVec3>,
    /// Constituent range in the particle store.
    pub spheres: Range<usize>,
    /// Reduced force, set by [`ClumpArena::reduce_forces`].
    pub force: DVec3,
    /// Reduced torque about the centre of mass.
    pub torque: DVec3,
}

impl Clump {
    /// World-frame inertia tensor R I R^T.
    pub fn world_inertia(&self) -> DMat3 {
        let r = DMat3::from_quat(self.orientation);
        r * self.inertia * r.transpose()
    }

    /// World-frame inverse inertia tensor.
    pub fn world_inv_inertia(&self) -> DMat3 {
        let r = DMat3::from_quat(self.orientation);
        r * self.inv_inertia * r.transpose()
    }

    /// World position of constituent `k`.
    #[inline]
    pub fn constituent_position(&self, k: usize) -> DVec3 {
        self.position + self.orientation * self.offsets[k]
    }

    /// Translational plus rotational kinetic energy.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.length_squared()
            + 0.5 * self.angular_velocity.dot(self.world_inertia() * self.angular_velocity)
    }
}

/// Arena of clump records.
#[derive(Debug, Clone, Default)]
pub struct ClumpArena {
    clumps: Vec<Clump>,
}

impl ClumpArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clumps.
    pub fn len(&self) -> usize {
        self.clumps.len()
    }

    /// Whether there are no clumps.
    pub fn is_empty(&self) -> bool {
        self.clumps.is_empty()
    }

    /// Clump by arena index.
    pub fn get(&self, index: usize) -> Option<&Clump> {
        self.clumps.get(index)
    }

    /// All clumps.
    pub fn iter(&self) -> std::slice::Iter<'_, Clump> {
        self.clumps.iter()
    }

    /// All clumps, mutably.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Clump> {
        self.clumps.iter_mut()
    }

    /// Total mass of the body owning sphere `i`.
    #[inline]
    pub fn body_mass(&self, particles: &ParticleStore, i: usize) -> f64 {
        match particles.body[i] {
            Body::Free => particles.mass[i],
            Body::Clump(c) => self.clumps[c].mass,
        }
    }

    /// Append a clump built from `template` (offsets already scaled) with its
    /// template origin placed so the centre of mass lands on `center`.
    /// Returns the arena index.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        particles: &mut ParticleStore,
        template: &[ClumpSphere],
        center: DVec3,
        orientation: DQuat,
        velocity: DVec3,
        material: MaterialId,
        density: f64,
    ) -> usize {
        let props = mass_properties(template, density);
        let index = self.clumps.len();
        let start = particles.len();
        let offsets: Vec<DVec3> = template.iter().map(|s| s.offset - props.center).collect();

        for (s, offset) in template.iter().zip(&offsets) {
            let position = center + orientation * *offset;
            particles.push(position, velocity, s.radius, material, density, Body::Clump(index));
        }

        self.clumps.push(Clump {
            position: center,
            orientation,
            velocity,
            angular_velocity: DVec3::ZERO,
            mass: props.mass,
            inertia: props.inertia,
            inv_inertia: props.inertia.inverse(),
            offsets,
            spheres: start..particles.len(),
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
        });
        index
    }

    /// Sum constituent forces and torques onto each clump's centre of mass:
    /// F = sum f_s, T = sum (t_s + (p_s - p_c) x f_s).
    pub fn reduce_forces(&mut self, particles: &ParticleStore) {
        for c in &mut self.clumps {
            let mut force = DVec3::ZERO;
            let mut torque = DVec3::ZERO;
            for s in c.spheres.clone() {
                let f = particles.force[s];
                force += f;
                torque += particles.torque[s] + (particles.position[s] - c.position).cross(f);
            }
            c.force = force;
            c.torque = torque;
        }
    }

    /// Re-derive constituent world positions and velocities from clump state.
    pub fn sync_constituents(&self, particles: &mut ParticleStore) {
        for c in &self.clumps {
            for (k, s) in c.spheres.clone().enumerate() {
                let arm = c.orientation * c.offsets[k];
                particles.position[s] = c.position + arm;
                particles.velocity[s] = c.velocity + c.angular_velocity.cross(arm);
                particles.angular_velocity[s] = c.angular_velocity;
            }
        }
    }

    /// Drop clumps flagged in `remove` and rewrite constituent ranges and
    /// back-references using `remap` (old store index -> new).
    pub(crate) fn compact(
        &mut self,
        remove: &[bool],
        remap: &[Option<usize>],
        particles: &mut ParticleStore,
    ) {
        let mut new_index = vec![None; self.clumps.len()];
        let mut next = 0;
        for (i, &r) in remove.iter().enumerate() {
            if !r {
                new_index[i] = Some(next);
                next += 1;
            }
        }

        let old = std::mem::take(&mut self.clumps);
        for (i, mut c) in old.into_iter().enumerate() {
            if remove[i] {
                continue;
            }
            let len = c.spheres.len();
            // Constituents of a kept clump are always kept, and compaction
            // preserves order, so the range stays contiguous.
            if let Some(start) = remap[c.spheres.start] {
                c.spheres = start..start + len;
            }
            self.clumps.push(c);
        }

        for b in &mut particles.body {
            if let Body::Clump(c) = b {
                if let Some(n) = new_index[*c] {
                    *c = n;
                }
            }
        }
    }
}

/// Validate a clump template and return its bounding radius (largest
/// |offset| + radius about the centre of mass).
pub fn validate_template(spheres: &[ClumpSphere]) -> Result<f64, String> {
    if !CLUMP_SPHERE_RANGE.contains(&spheres.len()) {
        return Err(format!(
            "clump must have {} to {} spheres, got {}",
            CLUMP_SPHERE_RANGE.start,
            CLUMP_SPHERE_RANGE.end - 1,
            spheres.len()
        ));
    }
    if let Some(s) = spheres
        .iter()
        .find(|s| !(s.radius > 0.0) || !s.offset.is_finite())
    {
        return Err(format!("invalid clump sphere {s:?}"));
    }
    let props = mass_properties(spheres, 1.0);
    Ok(bounding_radius(spheres, props.center))
}

/// Largest distance from `center` to any constituent surface.
pub fn bounding_radius(spheres: &[ClumpSphere], center: DVec3) -> f64 {
    spheres
        .iter()
        .map(|s| (s.offset - center).length() + s.radius)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dumbbell() -> Vec<ClumpSphere> {
        vec![
            ClumpSphere {
                offset: DVec3::new(-0.5, 0.0, 0.0),
                radius: 0.5,
            },
            ClumpSphere {
                offset: DVec3::new(0.5, 0.0, 0.0),
                radius: 0.5,
            },
        ]
    }

    #[test]
    fn dumbbell_mass_properties() {
        let props = mass_properties(&dumbbell(), 1.0);
        let m = 4.0 / 3.0 * std::f64::consts::PI * 0.125;
        assert!((props.mass - 2.0 * m).abs() < 1e-12);
        assert!(props.center.length() < 1e-12);
        // Axis along the dumbbell only has the spheres' own inertia.
        let own = 2.0 * 0.4 * m * 0.25;
        assert!((props.inertia.x_axis.x - own).abs() < 1e-12);
        assert!((props.inertia.y_axis.y - (own + 2.0 * m * 0.25)).abs() < 1e-12);
    }

    #[test]
    fn spawn_recentres_and_syncs() {
        let mut particles = ParticleStore::new();
        let mut arena = ClumpArena::new();
        let template = vec![
            ClumpSphere {
                offset: DVec3::ZERO,
                radius: 0.5,
            },
            ClumpSphere {
                offset: DVec3::new(1.0, 0.0, 0.0),
                radius: 0.5,
            },
        ];
        let c = arena.spawn(
            &mut particles,
            &template,
            DVec3::new(0.0, 2.0, 0.0),
            DQuat::IDENTITY,
            DVec3::ZERO,
            0,
            1000.0,
        );
        assert_eq!(particles.len(), 2);
        assert_eq!(particles.body[1], Body::Clump(c));
        assert!((particles.position[0] - DVec3::new(-0.5, 2.0, 0.0)).length() < 1e-12);

        let clump = &mut arena.clumps[c];
        clump.angular_velocity = DVec3::new(0.0, 0.0, 1.0);
        clump.orientation = DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2);
        arena.sync_constituents(&mut particles);
        assert!((particles.position[1] - DVec3::new(0.0, 2.5, 0.0)).length() < 1e-12);
        // v = w x r with r = (0, 0.5, 0)
        assert!((particles.velocity[1] - DVec3::new(-0.5, 0.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn force_reduction_includes_lever_arm() {
        let mut particles = ParticleStore::new();
        let mut arena = ClumpArena::new();
        arena.spawn(
            &mut particles,
            &dumbbell(),
            DVec3::ZERO,
            DQuat::IDENTITY,
            DVec3::ZERO,
            0,
            1.0,
        );
        particles.force[1] = DVec3::new(0.0, 1.0, 0.0);
        arena.reduce_forces(&particles);
        let c = arena.get(0).unwrap();
        assert_eq!(c.force, DVec3::new(0.0, 1.0, 0.0));
        // (0.5, 0, 0) x (0, 1, 0) = (0, 0, 0.5)
        assert!((c.torque - DVec3::new(0.0, 0.0, 0.5)).length() < 1e-12);
    }

    #[test]
    fn template_size_is_checked() {
        let one = vec![ClumpSphere {
            offset: DVec3::ZERO,
            radius: 1.0,
        }];
        assert!(validate_template(&one).is_err());
        let r = validate_template(&dumbbell()).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }
}

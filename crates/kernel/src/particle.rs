//! Struct-of-arrays sphere storage.
//!
//! Every sphere in the scene lives here, whether it moves freely or is a
//! constituent of a clump. Index `i` across every array refers to the same
//! sphere; the stable identity is `id[i]`, which survives compaction.

use std::f64::consts::PI;

use glam::DVec3;

use crate::aabb::Aabb;
use crate::material::MaterialId;

/// Stable particle identity. Assigned monotonically, never reused within a run.
pub type ParticleId = u32;

/// Which rigid body a sphere belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Body {
    /// Independent sphere integrated on its own.
    Free,
    /// Constituent of the clump at this arena index.
    Clump(usize),
}

/// Struct-of-arrays sphere storage.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    /// Stable identity.
    pub id: Vec<ParticleId>,
    /// Centre position (m).
    pub position: Vec<DVec3>,
    /// Linear velocity (m/s).
    pub velocity: Vec<DVec3>,
    /// Angular velocity (rad/s).
    pub angular_velocity: Vec<DVec3>,
    /// Radius (m).
    pub radius: Vec<f64>,
    /// Sphere mass (kg). Clump constituents carry their own share.
    pub mass: Vec<f64>,
    /// Scalar moment of inertia 2/5 m r^2 (kg m^2).
    pub inertia: Vec<f64>,
    /// Material id.
    pub material: Vec<MaterialId>,
    /// Accumulated contact force, reset every step.
    pub force: Vec<DVec3>,
    /// Accumulated contact torque about the sphere centre, reset every step.
    pub torque: Vec<DVec3>,
    /// Owning body.
    pub body: Vec<Body>,
    next_id: ParticleId,
}

impl ParticleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spheres.
    #[inline]
    pub fn len(&self) -> usize {
        self.id.len()
    }

    /// Whether the store holds no spheres.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// Add a free sphere and return its id.
    pub fn push_sphere(
        &mut self,
        position: DVec3,
        velocity: DVec3,
        radius: f64,
        material: MaterialId,
        density: f64,
    ) -> ParticleId {
        self.push(position, velocity, radius, material, density, Body::Free)
    }

    /// Add a sphere owned by `body`.
    pub(crate) fn push(
        &mut self,
        position: DVec3,
        velocity: DVec3,
        radius: f64,
        material: MaterialId,
        density: f64,
        body: Body,
    ) -> ParticleId {
        let mass = density * 4.0 / 3.0 * PI * radius.powi(3);
        let id = self.next_id;
        self.next_id += 1;

        self.id.push(id);
        self.position.push(position);
        self.velocity.push(velocity);
        self.angular_velocity.push(DVec3::ZERO);
        self.radius.push(radius);
        self.mass.push(mass);
        self.inertia.push(0.4 * mass * radius * radius);
        self.material.push(material);
        self.force.push(DVec3::ZERO);
        self.torque.push(DVec3::ZERO);
        self.body.push(body);
        id
    }

    /// Store index of particle `id`.
    pub fn index_of(&self, id: ParticleId) -> Option<usize> {
        // Ids are increasing in store order, so a binary search is valid.
        self.id.binary_search(&id).ok()
    }

    /// Zero accumulated force and torque.
    pub fn clear_forces(&mut self) {
        self.force.fill(DVec3::ZERO);
        self.torque.fill(DVec3::ZERO);
    }

    /// Bounding box of all spheres including their radii.
    pub fn bounds(&self) -> Aabb {
        self.position
            .iter()
            .zip(&self.radius)
            .fold(Aabb::empty(), |acc, (&p, &r)| acc.union(&Aabb::around_sphere(p, r)))
    }

    /// Smallest radius, `None` when empty.
    pub fn min_radius(&self) -> Option<f64> {
        self.radius.iter().copied().reduce(f64::min)
    }

    /// Largest radius, `None` when empty.
    pub fn max_radius(&self) -> Option<f64> {
        self.radius.iter().copied().reduce(f64::max)
    }

    /// Translational plus rotational kinetic energy of the free spheres.
    pub fn kinetic_energy(&self) -> f64 {
        (0..self.len())
            .filter(|&i| self.body[i] == Body::Free)
            .map(|i| {
                0.5 * self.mass[i] * self.velocity[i].length_squared()
                    + 0.5 * self.inertia[i] * self.angular_velocity[i].length_squared()
            })
            .sum()
    }

    /// Keep spheres where `keep[i]` is true, preserving order. Returns the
    /// old-to-new index map.
    pub(crate) fn retain(&mut self, keep: &[bool]) -> Vec<Option<usize>> {
        debug_assert_eq!(keep.len(), self.len());
        let mut remap = vec![None; self.len()];
        let mut w = 0;
        for r in 0..self.len() {
            if !keep[r] {
                continue;
            }
            remap[r] = Some(w);
            if w != r {
                self.id[w] = self.id[r];
                self.position[w] = self.position[r];
                self.velocity[w] = self.velocity[r];
                self.angular_velocity[w] = self.angular_velocity[r];
                self.radius[w] = self.radius[r];
                self.mass[w] = self.mass[r];
                self.inertia[w] = self.inertia[r];
                self.material[w] = self.material[r];
                self.force[w] = self.force[r];
                self.torque[w] = self.torque[r];
                self.body[w] = self.body[r];
            }
            w += 1;
        }
        self.id.truncate(w);
        self.position.truncate(w);
        self.velocity.truncate(w);
        self.angular_velocity.truncate(w);
        self.radius.truncate(w);
        self.mass.truncate(w);
        self.inertia.truncate(w);
        self.material.truncate(w);
        self.force.truncate(w);
        self.torque.truncate(w);
        self.body.truncate(w);
        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_increasing_ids_and_mass() {
        let mut s = ParticleStore::new();
        let a = s.push_sphere(DVec3::ZERO, DVec3::ZERO, 0.5, 0, 1000.0);
        let b = s.push_sphere(DVec3::X, DVec3::ZERO, 0.25, 0, 1000.0);
        assert!(b > a);
        let expected = 1000.0 * 4.0 / 3.0 * PI * 0.125;
        assert!((s.mass[0] - expected).abs() < 1e-9);
        assert!((s.inertia[0] - 0.4 * expected * 0.25).abs() < 1e-9);
        assert_eq!(s.index_of(b), Some(1));
    }

    #[test]
    fn retain_compacts_and_keeps_ids() {
        let mut s = ParticleStore::new();
        for i in 0..5 {
            s.push_sphere(DVec3::splat(i as f64), DVec3::ZERO, 0.1, 0, 1000.0);
        }
        let remap = s.retain(&[true, false, true, false, true]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.id, vec![0, 2, 4]);
        assert_eq!(remap, vec![Some(0), None, Some(1), None, Some(2)]);
        assert_eq!(s.position[2], DVec3::splat(4.0));
        // Removed ids are not handed out again.
        let next = s.push_sphere(DVec3::ZERO, DVec3::ZERO, 0.1, 0, 1000.0);
        assert_eq!(next, 5);
    }

    #[test]
    fn bounds_include_radius() {
        let mut s = ParticleStore::new();
        s.push_sphere(DVec3::ZERO, DVec3::ZERO, 0.5, 0, 1.0);
        s.push_sphere(DVec3::new(2.0, 0.0, 0.0), DVec3::ZERO, 0.25, 0, 1.0);
        let b = s.bounds();
        assert_eq!(b.min, DVec3::new(-0.5, -0.5, -0.5));
        assert_eq!(b.max, DVec3::new(2.25, 0.5, 0.5));
        assert_eq!(s.min_radius(), Some(0.25));
    }
}

//! Exact sphere-sphere and sphere-triangle contact tests.
//!
//! Conventions used throughout the contact pipeline:
//! - body `a` of a pair is the sphere with the lower id,
//! - the normal points from `a` towards `b` (towards the wall for wall contacts),
//! - relative velocity is `v_b - v_a` at the contact point.

use glam::DVec3;

use crate::contact::ContactKey;
use crate::error::StepError;
use crate::particle::ParticleStore;
use crate::wall::{TriangleFeature, WallMesh};

/// The second body of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partner {
    /// Another sphere, by store index.
    Particle(usize),
    /// A static wall triangle, by index.
    Wall(usize),
}

/// One confirmed contact with strictly positive overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Canonical identity.
    pub key: ContactKey,
    /// Store index of body `a`.
    pub a: usize,
    /// Body `b`.
    pub partner: Partner,
    /// Penetration depth, > 0.
    pub overlap: f64,
    /// Unit normal from `a` to `b`.
    pub normal: DVec3,
    /// Contact point (midpoint of the penetrating surfaces).
    pub point: DVec3,
    /// Velocity of `b` relative to `a` at the contact point.
    pub relative_velocity: DVec3,
    /// `omega_a - omega_b`.
    pub relative_spin: DVec3,
    /// R* = (1/R_a + 1/R_b)^-1, or R_a against a wall.
    pub effective_radius: f64,
}

impl Contact {
    /// Lever arm from the centre of `a` to the contact point.
    #[inline]
    pub fn lever_a(&self, particles: &ParticleStore) -> DVec3 {
        self.point - particles.position[self.a]
    }

    /// Lever arm from the centre of `b` to the contact point (zero for walls).
    #[inline]
    pub fn lever_b(&self, particles: &ParticleStore) -> DVec3 {
        match self.partner {
            Partner::Particle(b) => self.point - particles.position[b],
            Partner::Wall(_) => DVec3::ZERO,
        }
    }

    /// Smaller of the two radii.
    pub fn min_radius(&self, particles: &ParticleStore) -> f64 {
        match self.partner {
            Partner::Particle(b) => particles.radius[self.a].min(particles.radius[b]),
            Partner::Wall(_) => particles.radius[self.a],
        }
    }
}

#[inline]
fn surface_velocity(particles: &ParticleStore, i: usize, arm: DVec3) -> DVec3 {
    particles.velocity[i] + particles.angular_velocity[i].cross(arm)
}

/// Exact test for a candidate sphere pair.
pub fn sphere_sphere(particles: &ParticleStore, i: usize, j: usize) -> Option<Contact> {
    let (a, b) = if particles.id[i] <= particles.id[j] {
        (i, j)
    } else {
        (j, i)
    };
    let (ra, rb) = (particles.radius[a], particles.radius[b]);
    let d = particles.position[b] - particles.position[a];
    let dist = d.length();
    let overlap = ra + rb - dist;
    if overlap <= 0.0 {
        return None;
    }
    // Coincident centres have no defined normal; any unit vector keeps the
    // overlap check meaningful.
    let normal = if dist > 0.0 { d / dist } else { DVec3::Y };
    let point = particles.position[a] + normal * (ra - 0.5 * overlap);

    let arm_a = point - particles.position[a];
    let arm_b = point - particles.position[b];
    Some(Contact {
        key: ContactKey::pair(particles.id[a], particles.id[b]),
        a,
        partner: Partner::Particle(b),
        overlap,
        normal,
        point,
        relative_velocity: surface_velocity(particles, b, arm_b)
            - surface_velocity(particles, a, arm_a),
        relative_spin: particles.angular_velocity[a] - particles.angular_velocity[b],
        effective_radius: ra * rb / (ra + rb),
    })
}

/// Exact test for a sphere against one wall triangle. Also returns which
/// triangle feature the closest point lies on.
pub fn sphere_wall(
    particles: &ParticleStore,
    walls: &WallMesh,
    i: usize,
    triangle: usize,
) -> Option<(Contact, TriangleFeature)> {
    let tri = walls.get(triangle)?;
    let center = particles.position[i];
    let radius = particles.radius[i];
    let (closest, feature) = tri.closest_point(center);
    let d = closest - center;
    let dist = d.length();
    let overlap = radius - dist;
    if overlap <= 0.0 {
        return None;
    }
    let normal = if dist > 0.0 {
        d / dist
    } else if tri.plane_distance(center) >= 0.0 {
        -tri.normal
    } else {
        tri.normal
    };
    let arm = closest - center;
    Some((
        Contact {
            key: ContactKey::wall(particles.id[i], triangle),
            a: i,
            partner: Partner::Wall(triangle),
            overlap,
            normal,
            point: closest,
            relative_velocity: -surface_velocity(particles, i, arm),
            relative_spin: particles.angular_velocity[i],
            effective_radius: radius,
        },
        feature,
    ))
}

/// Resolve all wall hits of one particle, dropping edge and vertex hits that
/// are shadowed by a face hit in the same plane or duplicate an earlier
/// edge/vertex hit. Hits must all belong to the same particle.
pub fn resolve_wall_hits(
    walls: &WallMesh,
    hits: &mut Vec<(Contact, TriangleFeature)>,
    out: &mut Vec<Contact>,
) {
    if hits.len() == 1 {
        out.push(hits[0].0);
        hits.clear();
        return;
    }
    let tol = 1e-9 * hits.first().map_or(1.0, |(c, _)| c.effective_radius.max(1e-12));

    let mut faces: Vec<usize> = Vec::new();
    let start = out.len();
    for (c, f) in hits.iter() {
        if *f == TriangleFeature::Face {
            if let Partner::Wall(t) = c.partner {
                faces.push(t);
            }
            out.push(*c);
        }
    }
    for (c, f) in hits.iter() {
        if *f == TriangleFeature::Face {
            continue;
        }
        let in_face_plane = faces.iter().any(|&t| {
            walls
                .get(t)
                .is_some_and(|tri| tri.plane_distance(c.point).abs() <= tol)
        });
        if in_face_plane {
            continue;
        }
        let duplicate = out[start..]
            .iter()
            .any(|kept| (kept.point - c.point).length() <= tol);
        if !duplicate {
            out.push(*c);
        }
    }
    hits.clear();
}

/// Fail with [`StepError::ExcessiveOverlap`] on the first contact whose
/// overlap exceeds `fraction` of its smaller radius.
pub fn check_overlaps(
    particles: &ParticleStore,
    contacts: &[Contact],
    fraction: f64,
    step: u64,
) -> Result<(), StepError> {
    for c in contacts {
        let limit = fraction * c.min_radius(particles);
        if c.overlap > limit {
            return Err(StepError::ExcessiveOverlap {
                step,
                contact: c.key,
                overlap: c.overlap,
                limit,
            });
        }
    }
    Ok(())
}

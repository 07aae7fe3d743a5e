//! Execution backends.
//!
//! A backend decides *where* contact detection, force accumulation and the
//! free-sphere kick/drift run. The stepping algorithm in
//! [`DemKernel`](crate::DemKernel) is written once against
//! [`ExecutionBackend`]; both backends share [`respond`] for the contact law
//! so they cannot diverge in physics.

use std::sync::Arc;

use glam::DVec3;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::broad_phase::CandidatePairs;
use crate::clump::ClumpArena;
use crate::contact::ContactHistory;
use crate::hertz_mindlin::{evaluate, ContactBodies, ContactResponse, StepTiming};
use crate::integrator::kick_sphere;
use crate::material::MaterialTable;
use crate::narrow_phase::{resolve_wall_hits, sphere_sphere, sphere_wall, Contact, Partner};
use crate::particle::{Body, ParticleStore};
use crate::wall::{TriangleFeature, WallMesh};

/// Read-only inputs to the contact law for one force pass.
#[derive(Clone, Copy)]
pub struct ForceContext<'a> {
    /// Pair parameter lookup.
    pub materials: &'a MaterialTable,
    /// Clump records, for body masses.
    pub clumps: &'a ClumpArena,
    /// Tangential history from the previous step.
    pub history: &'a ContactHistory,
    /// Timestep and history interval.
    pub timing: StepTiming,
}

/// Where the per-contact and per-sphere work of a step executes.
pub trait ExecutionBackend: Send + Sync {
    /// Short name for logs and run summaries.
    fn name(&self) -> &'static str;

    /// Exact tests for all candidates. Sphere contacts go first, then wall
    /// contacts with shadowed edge/vertex hits already removed.
    fn detect(
        &self,
        particles: &ParticleStore,
        walls: &WallMesh,
        candidates: &CandidatePairs,
        out: &mut Vec<Contact>,
    );

    /// Evaluate every contact and write the summed force and torque into
    /// `particles.force` / `particles.torque` (previous values are
    /// overwritten). Returns the updated tangential displacement per
    /// contact, in `contacts` order.
    fn accumulate(
        &self,
        ctx: ForceContext<'_>,
        contacts: &[Contact],
        particles: &mut ParticleStore,
    ) -> Vec<DVec3>;

    /// Half-kick of the free spheres. Clump constituents are skipped.
    fn kick(&self, particles: &mut ParticleStore, gravity: DVec3, half_dt: f64);

    /// Drift of the free spheres. Clump constituents are skipped.
    fn drift(&self, particles: &mut ParticleStore, dt: f64);
}

/// Evaluate the contact law for one contact.
pub fn respond(ctx: &ForceContext<'_>, particles: &ParticleStore, contact: &Contact) -> ContactResponse {
    let a = contact.a;
    let mass_a = ctx.clumps.body_mass(particles, a);
    let (params, mass_b, inertia_b) = match contact.partner {
        Partner::Particle(b) => (
            ctx.materials.pair(particles.material[a], particles.material[b]),
            ctx.clumps.body_mass(particles, b),
            particles.inertia[b],
        ),
        Partner::Wall(_) => (
            ctx.materials.wall(particles.material[a]),
            f64::INFINITY,
            f64::INFINITY,
        ),
    };
    let bodies = ContactBodies::combine(mass_a, mass_b, particles.inertia[a], inertia_b);
    evaluate(
        contact,
        params,
        bodies,
        contact.lever_a(particles),
        contact.lever_b(particles),
        ctx.history.get(&contact.key),
        ctx.timing,
    )
}

/// Add one response into particle-indexed buffers: -F on `a`, +F on `b`.
#[inline]
fn scatter(contact: &Contact, r: &ContactResponse, force: &mut [DVec3], torque: &mut [DVec3]) {
    force[contact.a] -= r.force;
    torque[contact.a] += r.torque_a;
    if let Partner::Particle(b) = contact.partner {
        force[b] += r.force;
        torque[b] += r.torque_b;
    }
}

/// Group wall hits by particle (candidates arrive grouped) and resolve each
/// group.
fn resolve_grouped(
    walls: &WallMesh,
    hits: impl IntoIterator<Item = (Contact, TriangleFeature)>,
    out: &mut Vec<Contact>,
) {
    let mut group: Vec<(Contact, TriangleFeature)> = Vec::new();
    for hit in hits {
        if group.first().is_some_and(|(c, _)| c.a != hit.0.a) {
            resolve_wall_hits(walls, &mut group, out);
        }
        group.push(hit);
    }
    if !group.is_empty() {
        resolve_wall_hits(walls, &mut group, out);
    }
}

// ---------------------------------------------------------------------------
// Sequential
// ---------------------------------------------------------------------------

/// Single-threaded backend. Bit-reproducible for a fixed scene and seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ExecutionBackend for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn detect(
        &self,
        particles: &ParticleStore,
        walls: &WallMesh,
        candidates: &CandidatePairs,
        out: &mut Vec<Contact>,
    ) {
        out.clear();
        out.extend(
            candidates
                .particles
                .iter()
                .filter_map(|&(i, j)| sphere_sphere(particles, i, j)),
        );
        let hits = candidates
            .walls
            .iter()
            .filter_map(|&(i, t)| sphere_wall(particles, walls, i, t));
        resolve_grouped(walls, hits, out);
    }

    fn accumulate(
        &self,
        ctx: ForceContext<'_>,
        contacts: &[Contact],
        particles: &mut ParticleStore,
    ) -> Vec<DVec3> {
        let responses: Vec<ContactResponse> =
            contacts.iter().map(|c| respond(&ctx, particles, c)).collect();

        particles.clear_forces();
        let ParticleStore { force, torque, .. } = particles;
        for (c, r) in contacts.iter().zip(&responses) {
            scatter(c, r, force, torque);
        }
        responses.iter().map(|r| r.tangential_displacement).collect()
    }

    fn kick(&self, particles: &mut ParticleStore, gravity: DVec3, half_dt: f64) {
        for i in 0..particles.len() {
            if particles.body[i] != Body::Free {
                continue;
            }
            let (force, torque) = (particles.force[i], particles.torque[i]);
            let (mass, inertia) = (particles.mass[i], particles.inertia[i]);
            kick_sphere(
                &mut particles.velocity[i],
                &mut particles.angular_velocity[i],
                force,
                torque,
                mass,
                inertia,
                gravity,
                half_dt,
            );
        }
    }

    fn drift(&self, particles: &mut ParticleStore, dt: f64) {
        for i in 0..particles.len() {
            if particles.body[i] == Body::Free {
                particles.position[i] += particles.velocity[i] * dt;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------------

/// Multi-threaded backend built on rayon.
///
/// Contacts are evaluated in parallel; accumulation folds responses into
/// per-worker particle-indexed buffers and then reduces the buffers
/// element-wise. The reduction finishes before `accumulate` returns, so
/// the integrator never reads a partial sum. Summation order depends on
/// work stealing, so results may differ from [`Sequential`] at rounding
/// level.
#[derive(Clone, Default)]
pub struct Parallel {
    pool: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Parallel {
    /// Use rayon's global pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Worker count of the pool in use.
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |p| p.current_num_threads())
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl ExecutionBackend for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn detect(
        &self,
        particles: &ParticleStore,
        walls: &WallMesh,
        candidates: &CandidatePairs,
        out: &mut Vec<Contact>,
    ) {
        let (pairs, hits) = self.install(|| {
            let pairs: Vec<Contact> = candidates
                .particles
                .par_iter()
                .filter_map(|&(i, j)| sphere_sphere(particles, i, j))
                .collect();
            let hits: Vec<(Contact, TriangleFeature)> = candidates
                .walls
                .par_iter()
                .filter_map(|&(i, t)| sphere_wall(particles, walls, i, t))
                .collect();
            (pairs, hits)
        });
        out.clear();
        out.extend(pairs);
        resolve_grouped(walls, hits, out);
    }

    fn accumulate(
        &self,
        ctx: ForceContext<'_>,
        contacts: &[Contact],
        particles: &mut ParticleStore,
    ) -> Vec<DVec3> {
        let n = particles.len();
        let store: &ParticleStore = particles;
        let (responses, (force, torque)) = self.install(|| {
            let responses: Vec<ContactResponse> = contacts
                .par_iter()
                .map(|c| respond(&ctx, store, c))
                .collect();
            let sums = contacts
                .par_iter()
                .zip(responses.par_iter())
                .fold(
                    || (vec![DVec3::ZERO; n], vec![DVec3::ZERO; n]),
                    |(mut f, mut t), (c, r)| {
                        scatter(c, r, &mut f, &mut t);
                        (f, t)
                    },
                )
                .reduce(
                    || (vec![DVec3::ZERO; n], vec![DVec3::ZERO; n]),
                    |(mut fa, mut ta), (fb, tb)| {
                        fa.iter_mut().zip(&fb).for_each(|(x, y)| *x += *y);
                        ta.iter_mut().zip(&tb).for_each(|(x, y)| *x += *y);
                        (fa, ta)
                    },
                );
            (responses, sums)
        });

        particles.force = force;
        particles.torque = torque;
        responses.iter().map(|r| r.tangential_displacement).collect()
    }

    fn kick(&self, particles: &mut ParticleStore, gravity: DVec3, half_dt: f64) {
        let ParticleStore {
            velocity,
            angular_velocity,
            force,
            torque,
            mass,
            inertia,
            body,
            ..
        } = particles;
        let (force, torque, mass, inertia, body) = (&*force, &*torque, &*mass, &*inertia, &*body);
        self.install(|| {
            velocity
                .par_iter_mut()
                .zip(angular_velocity.par_iter_mut())
                .enumerate()
                .filter(|(i, _)| body[*i] == Body::Free)
                .for_each(|(i, (v, w))| {
                    kick_sphere(v, w, force[i], torque[i], mass[i], inertia[i], gravity, half_dt);
                });
        });
    }

    fn drift(&self, particles: &mut ParticleStore, dt: f64) {
        let ParticleStore {
            position,
            velocity,
            body,
            ..
        } = particles;
        let (velocity, body) = (&*velocity, &*body);
        self.install(|| {
            position
                .par_iter_mut()
                .enumerate()
                .filter(|(i, _)| body[*i] == Body::Free)
                .for_each(|(i, p)| *p += velocity[i] * dt);
        });
    }
}

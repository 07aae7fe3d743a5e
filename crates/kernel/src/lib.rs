//! Discrete-Element Simulation Kernel
//!
//! This crate advances spheres and rigid multi-sphere clumps through time
//! under gravity and Hertz-Mindlin contact forces inside static triangulated
//! walls. It performs no I/O; scene assembly, output and scheduling live in
//! the orchestrator crate.
//!
//! # Modules
//! - [`aabb`] -- Axis-aligned boxes.
//! - [`wall`] -- Static wall triangles and closest-point queries.
//! - [`material`] -- Material parameters and the precomputed pair table.
//! - [`particle`] -- Struct-of-arrays sphere storage.
//! - [`clump`] -- Rigid multi-sphere bodies and force reduction.
//! - [`neighbor`] -- Counting-sort uniform grid.
//! - [`bvh`] -- Median-split bounding volume tree.
//! - [`broad_phase`] -- Candidate-pair search over grid or tree.
//! - [`narrow_phase`] -- Exact sphere/sphere and sphere/triangle tests.
//! - [`contact`] -- Contact keys and the tangential history table.
//! - [`hertz_mindlin`] -- The contact force law.
//! - [`integrator`] -- Verlet kick/drift rules and the Rayleigh timestep.
//! - [`backend`] -- Sequential and rayon-parallel execution strategies.
//! - [`factory`] -- Volume fills and surface injection.

#![warn(missing_docs)]

pub mod aabb;
pub mod backend;
pub mod broad_phase;
pub mod bvh;
pub mod clump;
pub mod contact;
pub mod error;
pub mod factory;
pub mod hertz_mindlin;
pub mod integrator;
pub mod material;
pub mod narrow_phase;
pub mod neighbor;
pub mod particle;
pub mod wall;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use aabb::Aabb;
pub use backend::{ExecutionBackend, Parallel, Sequential};
pub use broad_phase::BroadPhaseKind;
pub use clump::{ClumpArena, ClumpSphere};
pub use contact::{ContactHistory, ContactKey};
pub use error::{ConfigError, GeometryError, MaterialError, StepError};
pub use factory::{Arrangement, ParticleFactory, ParticleShape, ParticleSource, SizeDistribution, SourceKind};
pub use integrator::{rayleigh_timestep, TimestepBound, DEFAULT_SAFETY_FRACTION};
pub use material::{Material, MaterialId, MaterialTable};
pub use particle::{Body, ParticleId, ParticleStore};
pub use wall::{WallMesh, WallTriangle};

use backend::ForceContext;
use broad_phase::{BroadPhase, CandidatePairs};
use hertz_mindlin::StepTiming;
use integrator::{drift_clump, kick_clump};
use narrow_phase::{check_overlaps, Contact};

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Everything one run mutates, plus the immutable tables it reads.
#[derive(Debug, Clone)]
pub struct SimulationState {
    /// Simulated time in seconds.
    pub time: f64,
    /// Timestep in seconds.
    pub dt: f64,
    /// Completed steps.
    pub step: u64,
    /// Gravitational acceleration (m/s^2).
    pub gravity: DVec3,
    /// All spheres, free and clump constituents.
    pub particles: ParticleStore,
    /// Rigid clump records.
    pub clumps: ClumpArena,
    /// Static walls.
    pub walls: Arc<WallMesh>,
    /// Material and pair parameters.
    pub materials: Arc<MaterialTable>,
    /// Tangential displacement per active contact.
    pub history: ContactHistory,
}

impl SimulationState {
    /// Empty state at t = 0.
    pub fn new(materials: Arc<MaterialTable>, walls: Arc<WallMesh>, gravity: DVec3, dt: f64) -> Self {
        Self {
            time: 0.0,
            dt,
            step: 0,
            gravity,
            particles: ParticleStore::new(),
            clumps: ClumpArena::new(),
            walls,
            materials,
            history: ContactHistory::new(),
        }
    }

    /// Free spheres plus clumps.
    pub fn body_count(&self) -> usize {
        let free = self.particles.body.iter().filter(|b| **b == Body::Free).count();
        free + self.clumps.len()
    }

    /// Kinetic energy of every body.
    pub fn kinetic_energy(&self) -> f64 {
        self.particles.kinetic_energy() + self.clumps.iter().map(|c| c.kinetic_energy()).sum::<f64>()
    }

    /// Rayleigh bound over the spheres currently present.
    pub fn timestep_bound(&self) -> Option<TimestepBound> {
        let mut smallest: HashMap<MaterialId, f64> = HashMap::new();
        for (&m, &r) in self.particles.material.iter().zip(&self.particles.radius) {
            let e = smallest.entry(m).or_insert(r);
            *e = e.min(r);
        }
        TimestepBound::from_radii(&self.materials, smallest)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn default_cell_factor() -> f64 {
    2.0
}

fn default_max_overlap() -> f64 {
    0.1
}

/// Tunables of the stepping loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Particle-particle spatial index.
    #[serde(default)]
    pub broad_phase: BroadPhaseKind,
    /// Grid cell size in multiples of the largest diameter (>= 1).
    #[serde(default = "default_cell_factor")]
    pub grid_cell_factor: f64,
    /// Overlap, as a fraction of the smaller radius, that aborts a step.
    #[serde(default = "default_max_overlap")]
    pub max_overlap_fraction: f64,
    /// Bodies leaving this box are removed.
    #[serde(default)]
    pub domain: Option<Aabb>,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            broad_phase: BroadPhaseKind::Auto,
            grid_cell_factor: default_cell_factor(),
            max_overlap_fraction: default_max_overlap(),
            domain: None,
        }
    }
}

impl KernelSettings {
    /// Check ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grid_cell_factor >= 1.0 && self.grid_cell_factor.is_finite()) {
            return Err(ConfigError::InvalidSetting(format!(
                "grid_cell_factor must be >= 1, got {}",
                self.grid_cell_factor
            )));
        }
        if !(self.max_overlap_fraction > 0.0 && self.max_overlap_fraction <= 1.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "max_overlap_fraction must be in (0, 1], got {}",
                self.max_overlap_fraction
            )));
        }
        if let Some(domain) = &self.domain {
            if !domain.is_valid() || domain.volume() <= 0.0 {
                return Err(ConfigError::InvalidSetting(format!("domain {domain:?} is empty")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// Object-safe view of a running simulation.
///
/// Each call to [`step`](SimulationKernel::step) runs the phases:
///
/// 1. Half-kick and drift
/// 2. Broad phase and narrow phase
/// 3. History prune and contact mechanics
/// 4. Clump force reduction and second half-kick
pub trait SimulationKernel {
    /// Advance one timestep.
    fn step(&mut self) -> Result<(), StepError>;

    /// Current state.
    fn state(&self) -> &SimulationState;

    /// Mutable state, for inserting bodies between steps.
    fn state_mut(&mut self) -> &mut SimulationState;

    /// Name of the execution backend.
    fn backend_name(&self) -> &'static str;

    /// Number of spheres in the store.
    fn particle_count(&self) -> usize {
        self.state().particles.len()
    }

    /// Active contacts after the last force pass.
    fn contact_count(&self) -> usize {
        self.state().history.len()
    }
}

// ---------------------------------------------------------------------------
// DemKernel
// ---------------------------------------------------------------------------

/// The stepping algorithm, generic over where its inner loops execute.
///
/// Kick-drift-kick velocity Verlet: forces at the new positions are
/// computed between the two half-kicks, and the very first step bootstraps
/// forces at the initial positions.
pub struct DemKernel<B: ExecutionBackend> {
    state: SimulationState,
    settings: KernelSettings,
    backend: B,
    broad_phase: BroadPhase,
    candidates: CandidatePairs,
    contacts: Vec<Contact>,
    /// Whether the initial force computation has been performed.
    needs_init: bool,
}

impl<B: ExecutionBackend> DemKernel<B> {
    /// Wrap a prepared state.
    ///
    /// Fails if a setting is out of range or the timestep exceeds the
    /// Rayleigh bound of the spheres already present.
    pub fn new(state: SimulationState, settings: KernelSettings, backend: B) -> Result<Self, ConfigError> {
        settings.validate()?;
        if !(state.dt > 0.0 && state.dt.is_finite()) {
            return Err(ConfigError::InvalidTimestep(state.dt));
        }
        if let Some(bound) = state.timestep_bound() {
            bound.resolve(Some(state.dt), DEFAULT_SAFETY_FRACTION)?;
        }
        let broad_phase = BroadPhase::new(settings.broad_phase, settings.grid_cell_factor, &state.walls);
        info!(
            backend = backend.name(),
            particles = state.particles.len(),
            clumps = state.clumps.len(),
            walls = state.walls.len(),
            dt = state.dt,
            "DEM kernel ready"
        );
        Ok(Self {
            state,
            settings,
            backend,
            broad_phase,
            candidates: CandidatePairs::default(),
            contacts: Vec::new(),
            needs_init: true,
        })
    }

    /// Kernel settings.
    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// Contacts found by the last force pass. Cleared when bodies are
    /// removed, since store indices shift.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Consume the kernel and return its state.
    pub fn into_state(self) -> SimulationState {
        self.state
    }

    /// Broad phase, narrow phase, history prune, mechanics, clump
    /// reduction. `step` is the number reported in overlap errors.
    fn compute_forces(&mut self, step: u64, timing: StepTiming) -> Result<(), StepError> {
        let state = &mut self.state;

        self.broad_phase.find_candidates(&state.particles, &mut self.candidates);
        self.backend
            .detect(&state.particles, &state.walls, &self.candidates, &mut self.contacts);
        check_overlaps(
            &state.particles,
            &self.contacts,
            self.settings.max_overlap_fraction,
            step,
        )?;

        state.history.prune(self.contacts.iter().map(|c| &c.key));

        let ctx = ForceContext {
            materials: state.materials.as_ref(),
            clumps: &state.clumps,
            history: &state.history,
            timing,
        };
        let displacements = self.backend.accumulate(ctx, &self.contacts, &mut state.particles);
        for (c, d) in self.contacts.iter().zip(displacements) {
            state.history.insert(c.key, d);
        }

        state.clumps.reduce_forces(&state.particles);
        Ok(())
    }

    fn half_kick(&mut self, half_dt: f64) {
        let gravity = self.state.gravity;
        self.backend.kick(&mut self.state.particles, gravity, half_dt);
        for c in self.state.clumps.iter_mut() {
            kick_clump(c, gravity, half_dt);
        }
    }

    fn check_finite(&self) -> Result<(), StepError> {
        let p = &self.state.particles;
        let bad = (0..p.len()).find(|&i| {
            !(p.position[i].is_finite() && p.velocity[i].is_finite() && p.angular_velocity[i].is_finite())
        });
        match bad {
            Some(i) => Err(StepError::NonFinite {
                step: self.state.step,
                particle: p.id[i],
            }),
            None => Ok(()),
        }
    }

    /// Drop free spheres whose centre and clumps whose centroid left the
    /// domain.
    fn remove_escaped(&mut self) {
        let Some(domain) = self.settings.domain else {
            return;
        };
        let state = &mut self.state;
        let n = state.particles.len();
        let mut keep = vec![true; n];
        for i in 0..n {
            if state.particles.body[i] == Body::Free && !domain.contains(state.particles.position[i]) {
                keep[i] = false;
            }
        }
        let mut remove_clump = vec![false; state.clumps.len()];
        for (k, c) in state.clumps.iter().enumerate() {
            if !domain.contains(c.position) {
                remove_clump[k] = true;
                for s in c.spheres.clone() {
                    keep[s] = false;
                }
            }
        }
        if keep.iter().all(|&k| k) {
            return;
        }

        let removed: HashSet<ParticleId> = (0..n)
            .filter(|&i| !keep[i])
            .map(|i| state.particles.id[i])
            .collect();
        let remap = state.particles.retain(&keep);
        state.clumps.compact(&remove_clump, &remap, &mut state.particles);
        state.history.forget_particles(&removed);
        self.contacts.clear();
        debug!(removed = removed.len(), step = state.step, "removed bodies outside the domain");
    }
}

impl<B: ExecutionBackend> SimulationKernel for DemKernel<B> {
    fn step(&mut self) -> Result<(), StepError> {
        let dt = self.state.dt;
        let half_dt = 0.5 * dt;

        // --- 0. Bootstrap: forces at the initial positions ---
        if self.needs_init {
            self.compute_forces(self.state.step, StepTiming::bootstrap(dt))?;
            self.needs_init = false;
        }

        // --- 1. Half-kick ---
        self.half_kick(half_dt);

        // --- 2. Drift; constituents follow their clumps ---
        self.backend.drift(&mut self.state.particles, dt);
        for c in self.state.clumps.iter_mut() {
            drift_clump(c, dt);
        }
        self.state.clumps.sync_constituents(&mut self.state.particles);

        // --- 3. Forces at the new positions ---
        self.compute_forces(self.state.step + 1, StepTiming::step(dt))?;

        // --- 4. Second half-kick ---
        self.half_kick(half_dt);
        self.state.clumps.sync_constituents(&mut self.state.particles);

        self.state.time += dt;
        self.state.step += 1;
        self.check_finite()?;
        self.remove_escaped();
        Ok(())
    }

    fn state(&self) -> &SimulationState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

// ---------------------------------------------------------------------------
// Test fixtures shared by unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn glass() -> Material {
        Material {
            name: "glass".into(),
            youngs_modulus: 6.0e7,
            poisson_ratio: 0.25,
            density: 2500.0,
            restitution: 0.6,
            friction: 0.4,
            wall_friction: 0.4,
            rolling_friction: 0.01,
        }
    }

    pub(crate) fn glass_table() -> MaterialTable {
        MaterialTable::new(vec![glass()]).unwrap()
    }

    pub(crate) fn empty_state(table: MaterialTable) -> SimulationState {
        SimulationState::new(
            Arc::new(table),
            Arc::new(WallMesh::empty()),
            DVec3::new(0.0, -9.81, 0.0),
            1e-5,
        )
    }

    /// `n` spheres on a closed ring in the xy plane with neighbouring
    /// centres `spacing` apart and a deterministic velocity field.
    pub(crate) fn ring_store(n: usize, radius: f64, spacing: f64) -> ParticleStore {
        let ring = spacing / (2.0 * (std::f64::consts::PI / n as f64).sin());
        let mut store = ParticleStore::new();
        for k in 0..n {
            let a = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
            let p = DVec3::new(ring * a.cos(), ring * a.sin(), 0.0);
            let v = DVec3::new((k as f64).sin(), (3.0 * k as f64).cos(), 0.3 * (k as f64).sin()) * 0.01;
            store.push_sphere(p, v, radius, 0, 2500.0);
            store.angular_velocity[k] = DVec3::new(0.0, 0.0, (2.0 * k as f64).cos());
        }
        store
    }
}

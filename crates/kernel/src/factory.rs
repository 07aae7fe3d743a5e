//! Particle factory: volume fills and surface injection.
//!
//! Every source owns its own RNG seeded from the scene seed and the source
//! index, so a fixed scene places bodies identically on every run.

use std::collections::HashMap;
use std::f64::consts::PI;

use glam::{DQuat, DVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aabb::Aabb;
use crate::bvh::BoundingVolumeTree;
use crate::clump::{mass_properties, validate_template, ClumpSphere};
use crate::error::ConfigError;
use crate::material::{MaterialId, MaterialTable};
use crate::particle::ParticleStore;
use crate::wall::WallMesh;
use crate::SimulationState;

/// Default cap on consecutive rejected placements for a volume fill.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10_000;

/// Placement tries per injected body before it is skipped.
const INJECTION_TRIES: usize = 8;

/// Lattice spacing slack so neighbours never start in contact.
const LATTICE_GAP: f64 = 1e-3;

// ---------------------------------------------------------------------------
// Source description
// ---------------------------------------------------------------------------

/// Radius distribution of a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SizeDistribution {
    /// Every body has the same radius.
    Fixed {
        /// Radius.
        radius: f64,
    },
    /// Uniform in `[min, max]`.
    Uniform {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Log-normal with the given median and log-space deviation, clamped.
    LogNormal {
        /// Median radius.
        median: f64,
        /// Standard deviation of ln(radius).
        sigma: f64,
        /// Lower clamp.
        min: f64,
        /// Upper clamp.
        max: f64,
    },
}

impl SizeDistribution {
    /// Draw one radius.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            SizeDistribution::Fixed { radius } => radius,
            SizeDistribution::Uniform { min, max } => {
                if max > min {
                    rng.gen_range(min..=max)
                } else {
                    min
                }
            }
            SizeDistribution::LogNormal {
                median,
                sigma,
                min,
                max,
            } => {
                // Box-Muller; u1 in (0, 1] keeps the log finite.
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                (median * (sigma * z).exp()).clamp(min, max)
            }
        }
    }

    /// Smallest radius this distribution can produce.
    pub fn min_radius(&self) -> f64 {
        match *self {
            SizeDistribution::Fixed { radius } => radius,
            SizeDistribution::Uniform { min, .. } | SizeDistribution::LogNormal { min, .. } => min,
        }
    }

    /// Largest radius this distribution can produce.
    pub fn max_radius(&self) -> f64 {
        match *self {
            SizeDistribution::Fixed { radius } => radius,
            SizeDistribution::Uniform { max, .. } | SizeDistribution::LogNormal { max, .. } => max,
        }
    }

    /// Representative radius for count estimates.
    pub fn typical_radius(&self) -> f64 {
        match *self {
            SizeDistribution::Fixed { radius } => radius,
            SizeDistribution::Uniform { min, max } => 0.5 * (min + max),
            SizeDistribution::LogNormal { median, min, max, .. } => median.clamp(min, max),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let (lo, hi) = (self.min_radius(), self.max_radius());
        if !(lo > 0.0 && lo.is_finite() && hi.is_finite()) {
            return Err(format!("radii must be positive and finite, got [{lo}, {hi}]"));
        }
        if hi < lo {
            return Err(format!("max radius {hi} is below min radius {lo}"));
        }
        if let SizeDistribution::LogNormal { median, sigma, .. } = *self {
            if !(median > 0.0) || !(sigma >= 0.0) {
                return Err(format!("log-normal needs median > 0 and sigma >= 0, got {median}, {sigma}"));
            }
        }
        Ok(())
    }
}

/// Body shape emitted by a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticleShape {
    /// A single sphere of the sampled radius.
    #[default]
    Sphere,
    /// Rigid clump; offsets and radii are in units of the sampled radius.
    Clump {
        /// Constituent spheres.
        spheres: Vec<ClumpSphere>,
    },
}

impl ParticleShape {
    /// Constituent spheres for sampled radius `scale`.
    pub fn scaled(&self, scale: f64) -> Vec<ClumpSphere> {
        match self {
            ParticleShape::Sphere => vec![ClumpSphere {
                offset: DVec3::ZERO,
                radius: scale,
            }],
            ParticleShape::Clump { spheres } => spheres
                .iter()
                .map(|s| ClumpSphere {
                    offset: s.offset * scale,
                    radius: s.radius * scale,
                })
                .collect(),
        }
    }

    /// Bounding radius per unit sampled radius.
    pub fn bounding_factor(&self) -> f64 {
        match self {
            ParticleShape::Sphere => 1.0,
            ParticleShape::Clump { spheres } => validate_template(spheres).unwrap_or(1.0),
        }
    }

    /// Smallest constituent radius per unit sampled radius.
    pub fn smallest_sphere_factor(&self) -> f64 {
        match self {
            ParticleShape::Sphere => 1.0,
            ParticleShape::Clump { spheres } => spheres
                .iter()
                .map(|s| s.radius)
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Whether this is a multi-sphere shape.
    pub fn is_clump(&self) -> bool {
        matches!(self, ParticleShape::Clump { .. })
    }

    /// Solid volume per unit sampled radius cubed. Constituent overlap is
    /// counted twice, matching the mass model.
    fn unit_volume(&self) -> f64 {
        match self {
            ParticleShape::Sphere => 4.0 / 3.0 * PI,
            ParticleShape::Clump { spheres } => spheres
                .iter()
                .map(|s| 4.0 / 3.0 * PI * s.radius.powi(3))
                .sum(),
        }
    }
}

/// How a volume fill chooses candidate positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arrangement {
    /// Uniformly random positions with rejection.
    #[default]
    Random,
    /// Simple cubic lattice, filled in layers of increasing y.
    Lattice,
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

/// Where and when a source creates bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Pack a box once at setup until the count or packing target is hit.
    VolumeFill {
        /// Box to fill.
        region: Aabb,
        /// Stop after this many bodies.
        #[serde(default)]
        target_count: Option<usize>,
        /// Stop once solid volume reaches this fraction of the box.
        #[serde(default)]
        packing_fraction: Option<f64>,
        /// Candidate position pattern.
        #[serde(default)]
        arrangement: Arrangement,
        /// Consecutive rejections before giving up.
        #[serde(default = "default_max_attempts")]
        max_attempts: usize,
    },
    /// Emit bodies from a parallelogram at a fixed rate.
    SurfaceInjection {
        /// Corner of the emission area.
        origin: DVec3,
        /// First edge.
        edge_u: DVec3,
        /// Second edge.
        edge_v: DVec3,
        /// Bodies per second.
        rate: f64,
        /// Emission start time.
        #[serde(default)]
        start_time: f64,
        /// Emission end time (open-ended if absent).
        #[serde(default)]
        stop_time: Option<f64>,
        /// Total cap on emitted bodies.
        #[serde(default)]
        max_count: Option<usize>,
    },
}

/// One particle source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSource {
    /// Fill or injection parameters.
    pub kind: SourceKind,
    /// Material of every body it creates.
    pub material: MaterialId,
    /// Radius distribution.
    pub size: SizeDistribution,
    /// Body shape.
    pub shape: ParticleShape,
    /// Initial linear velocity.
    pub velocity: DVec3,
}

impl ParticleSource {
    fn validate(&self, materials: &MaterialTable) -> Result<(), String> {
        materials
            .require(self.material)
            .map_err(|e| e.to_string())?;
        self.size.validate()?;
        if let ParticleShape::Clump { spheres } = &self.shape {
            validate_template(spheres)?;
        }
        if !self.velocity.is_finite() {
            return Err("initial velocity is not finite".into());
        }
        match &self.kind {
            SourceKind::VolumeFill {
                region,
                target_count,
                packing_fraction,
                ..
            } => {
                if !region.is_valid() || region.volume() <= 0.0 {
                    return Err(format!("fill region {region:?} is empty"));
                }
                if target_count.is_none() && packing_fraction.is_none() {
                    return Err("fill needs a target_count or a packing_fraction".into());
                }
                if let Some(pf) = packing_fraction {
                    if !(*pf > 0.0 && *pf < 1.0) {
                        return Err(format!("packing fraction must be in (0, 1), got {pf}"));
                    }
                }
            }
            SourceKind::SurfaceInjection {
                edge_u,
                edge_v,
                rate,
                start_time,
                stop_time,
                ..
            } => {
                if !(*rate > 0.0 && rate.is_finite()) {
                    return Err(format!("injection rate must be positive, got {rate}"));
                }
                if edge_u.cross(*edge_v).length_squared() <= 0.0 {
                    return Err("injection edges are parallel".into());
                }
                if stop_time.is_some_and(|stop| stop < *start_time) {
                    return Err("injection stops before it starts".into());
                }
            }
        }
        Ok(())
    }

    /// Upper estimate of the bodies this source creates within `duration`.
    pub fn estimate_count(&self, duration: f64) -> usize {
        match &self.kind {
            SourceKind::VolumeFill {
                region,
                target_count,
                packing_fraction,
                ..
            } => {
                let by_volume = packing_fraction.map(|pf| {
                    let body = self.shape.unit_volume() * self.size.typical_radius().powi(3);
                    (pf * region.volume() / body).ceil() as usize
                });
                match (target_count, by_volume) {
                    (Some(t), Some(v)) => (*t).min(v),
                    (Some(t), None) => *t,
                    (None, Some(v)) => v,
                    (None, None) => 0,
                }
            }
            SourceKind::SurfaceInjection {
                rate,
                start_time,
                stop_time,
                max_count,
                ..
            } => {
                let end = stop_time.map_or(duration, |s| s.min(duration));
                let n = (rate * (end - start_time).max(0.0)).ceil() as usize;
                max_count.map_or(n, |cap| n.min(cap))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Placement checks
// ---------------------------------------------------------------------------

/// Hash grid of placed spheres for overlap rejection.
struct PlacementIndex {
    cell: f64,
    cells: HashMap<[i64; 3], Vec<(DVec3, f64)>>,
}

impl PlacementIndex {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            cells: HashMap::new(),
        }
    }

    fn from_store(store: &ParticleStore, cell: f64) -> Self {
        let mut index = Self::new(cell);
        for (&p, &r) in store.position.iter().zip(&store.radius) {
            index.insert(p, r);
        }
        index
    }

    fn key(&self, p: DVec3) -> [i64; 3] {
        let c = (p / self.cell).floor();
        [c.x as i64, c.y as i64, c.z as i64]
    }

    fn cells_of(&self, center: DVec3, radius: f64) -> impl Iterator<Item = [i64; 3]> {
        let lo = self.key(center - DVec3::splat(radius));
        let hi = self.key(center + DVec3::splat(radius));
        (lo[0]..=hi[0]).flat_map(move |x| {
            (lo[1]..=hi[1]).flat_map(move |y| (lo[2]..=hi[2]).map(move |z| [x, y, z]))
        })
    }

    fn insert(&mut self, center: DVec3, radius: f64) {
        let keys: Vec<[i64; 3]> = self.cells_of(center, radius).collect();
        for k in keys {
            self.cells.entry(k).or_default().push((center, radius));
        }
    }

    fn overlaps(&self, center: DVec3, radius: f64) -> bool {
        self.cells_of(center, radius).any(|k| {
            self.cells.get(&k).is_some_and(|spheres| {
                spheres
                    .iter()
                    .any(|&(p, r)| (p - center).length_squared() < (r + radius) * (r + radius))
            })
        })
    }
}

/// Wall-overlap test accelerated by a tree over the triangles.
#[derive(Debug, Clone)]
struct WallClearance {
    tree: BoundingVolumeTree,
}

impl WallClearance {
    fn new(walls: &WallMesh) -> Self {
        let boxes: Vec<Aabb> = walls.triangles().iter().map(|t| t.aabb()).collect();
        Self {
            tree: BoundingVolumeTree::build(&boxes),
        }
    }

    fn touches(&self, walls: &WallMesh, center: DVec3, radius: f64) -> bool {
        let mut hit = false;
        self.tree
            .query(&Aabb::around_sphere(center, radius), |t| {
                if hit {
                    return;
                }
                if let Some(tri) = walls.get(t) {
                    hit = (tri.closest_point(center).0 - center).length_squared() < radius * radius;
                }
            });
        hit
    }
}

/// Uniformly distributed rotation (Shoemake's method).
fn random_orientation<R: Rng + ?Sized>(rng: &mut R) -> DQuat {
    let (u1, u2, u3): (f64, f64, f64) = (rng.gen(), rng.gen(), rng.gen());
    let (a, b) = ((1.0 - u1).sqrt(), u1.sqrt());
    DQuat::from_xyzw(
        a * (2.0 * PI * u2).sin(),
        a * (2.0 * PI * u2).cos(),
        b * (2.0 * PI * u3).sin(),
        b * (2.0 * PI * u3).cos(),
    )
    .normalize()
}

/// A body ready to be placed: world-frame constituent spheres plus what
/// `spawn` needs.
struct Candidate {
    spheres: Vec<ClumpSphere>,
    world: Vec<(DVec3, f64)>,
    center: DVec3,
    orientation: DQuat,
    volume: f64,
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SourceState {
    source: ParticleSource,
    rng: StdRng,
    density: f64,
    credit: f64,
    emitted: usize,
}

/// Creates bodies from configured sources.
///
/// Built against one wall mesh; `fill` and `inject` must be called with a
/// state that uses the same mesh.
#[derive(Debug, Clone)]
pub struct ParticleFactory {
    sources: Vec<SourceState>,
    clearance: WallClearance,
}

fn source_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl ParticleFactory {
    /// Validate sources and seed one RNG per source.
    pub fn new(
        sources: Vec<ParticleSource>,
        materials: &MaterialTable,
        walls: &WallMesh,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let mut states = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            source
                .validate(materials)
                .map_err(|reason| ConfigError::InvalidSource { index, reason })?;
            let density = materials.require(source.material)?.density;
            states.push(SourceState {
                source,
                rng: StdRng::seed_from_u64(source_seed(seed, index)),
                density,
                credit: 0.0,
                emitted: 0,
            });
        }
        Ok(Self {
            sources: states,
            clearance: WallClearance::new(walls),
        })
    }

    /// Configured sources.
    pub fn sources(&self) -> impl Iterator<Item = &ParticleSource> {
        self.sources.iter().map(|s| &s.source)
    }

    /// Whether any source emits clumps.
    pub fn has_clumps(&self) -> bool {
        self.sources().any(|s| s.shape.is_clump())
    }

    /// Peak body count over a run of `duration` seconds.
    pub fn estimate_peak(&self, duration: f64) -> usize {
        self.sources().map(|s| s.estimate_count(duration)).sum()
    }

    /// Peak sphere count (clump constituents counted individually).
    pub fn estimate_peak_spheres(&self, duration: f64) -> usize {
        self.sources()
            .map(|s| {
                let per_body = match &s.shape {
                    ParticleShape::Sphere => 1,
                    ParticleShape::Clump { spheres } => spheres.len(),
                };
                s.estimate_count(duration) * per_body
            })
            .sum()
    }

    /// Smallest sphere radius any source can produce for `material`.
    pub fn min_radius_for(&self, material: MaterialId) -> Option<f64> {
        self.sources()
            .filter(|s| s.material == material)
            .map(|s| s.size.min_radius() * s.shape.smallest_sphere_factor())
            .reduce(f64::min)
    }

    /// `(material, smallest radius)` for every material any source uses.
    pub fn min_radii(&self) -> Vec<(MaterialId, f64)> {
        let mut out: Vec<(MaterialId, f64)> = Vec::new();
        for s in self.sources() {
            if out.iter().any(|(m, _)| *m == s.material) {
                continue;
            }
            if let Some(r) = self.min_radius_for(s.material) {
                out.push((s.material, r));
            }
        }
        out
    }

    /// Largest sphere radius any source can produce.
    fn max_bounding_radius(&self) -> f64 {
        self.sources()
            .map(|s| s.size.max_radius() * s.shape.bounding_factor())
            .fold(0.0, f64::max)
    }

    fn placement_index(&self, state: &SimulationState) -> PlacementIndex {
        let largest = self
            .max_bounding_radius()
            .max(state.particles.max_radius().unwrap_or(0.0));
        PlacementIndex::from_store(&state.particles, (2.0 * largest).max(f64::MIN_POSITIVE))
    }

    /// Run every volume fill. Returns the number of bodies placed.
    pub fn fill(&mut self, state: &mut SimulationState) -> usize {
        let mut index = self.placement_index(state);
        let mut total = 0;
        for k in 0..self.sources.len() {
            if !matches!(self.sources[k].source.kind, SourceKind::VolumeFill { .. }) {
                continue;
            }
            let placed = self.fill_one(k, state, &mut index);
            info!(source = k, placed, "volume fill complete");
            total += placed;
        }
        total
    }

    fn fill_one(&mut self, k: usize, state: &mut SimulationState, index: &mut PlacementIndex) -> usize {
        let SourceKind::VolumeFill {
            region,
            target_count,
            packing_fraction,
            arrangement,
            max_attempts,
        } = self.sources[k].source.kind.clone()
        else {
            return 0;
        };
        let count_limit = target_count.unwrap_or(usize::MAX);
        let volume_limit = packing_fraction.map_or(f64::INFINITY, |pf| pf * region.volume());

        let mut placed = 0;
        let mut volume = 0.0;
        let done = |placed: usize, volume: f64| placed >= count_limit || volume >= volume_limit;

        match arrangement {
            Arrangement::Random => {
                let mut failures = 0;
                while !done(placed, volume) && failures < max_attempts {
                    let point = {
                        let rng = &mut self.sources[k].rng;
                        DVec3::new(
                            rng.gen_range(region.min.x..=region.max.x),
                            rng.gen_range(region.min.y..=region.max.y),
                            rng.gen_range(region.min.z..=region.max.z),
                        )
                    };
                    let candidate = self.candidate(k, point);
                    if self.accept(state, index, &candidate, Some(&region)) {
                        volume += candidate.volume;
                        self.place(k, state, index, candidate);
                        placed += 1;
                        failures = 0;
                    } else {
                        failures += 1;
                    }
                }
            }
            Arrangement::Lattice => {
                let source = &self.sources[k].source;
                let rb = source.size.max_radius() * source.shape.bounding_factor();
                let spacing = 2.0 * rb * (1.0 + LATTICE_GAP);
                let span = region.extent() - DVec3::splat(2.0 * rb);
                let steps = |s: f64| if s < 0.0 { 0 } else { (s / spacing).floor() as usize + 1 };
                let (nx, ny, nz) = (steps(span.x), steps(span.y), steps(span.z));
                let origin = region.min + DVec3::splat(rb);
                'layers: for iy in 0..ny {
                    for iz in 0..nz {
                        for ix in 0..nx {
                            if done(placed, volume) {
                                break 'layers;
                            }
                            let point = origin + DVec3::new(ix as f64, iy as f64, iz as f64) * spacing;
                            let candidate = self.candidate(k, point);
                            if self.accept(state, index, &candidate, Some(&region)) {
                                volume += candidate.volume;
                                self.place(k, state, index, candidate);
                                placed += 1;
                            }
                        }
                    }
                }
            }
        }

        if let Some(target) = target_count {
            if placed < target && volume < volume_limit {
                warn!(source = k, placed, target, "volume fill stopped short of its target");
            }
        }
        self.sources[k].emitted += placed;
        placed
    }

    /// Emit due bodies from every active injection source for the step that
    /// starts at `state.time`. Returns the number placed.
    pub fn inject(&mut self, state: &mut SimulationState) -> usize {
        let (time, dt) = (state.time, state.dt);
        let mut index: Option<PlacementIndex> = None;
        let mut total = 0;

        for k in 0..self.sources.len() {
            let SourceKind::SurfaceInjection {
                origin,
                edge_u,
                edge_v,
                rate,
                start_time,
                stop_time,
                max_count,
            } = self.sources[k].source.kind
            else {
                continue;
            };
            if time < start_time || stop_time.is_some_and(|stop| time >= stop) {
                continue;
            }
            let cap = max_count.unwrap_or(usize::MAX);
            let s = &mut self.sources[k];
            if s.emitted >= cap {
                continue;
            }
            s.credit += rate * dt;
            let due = (s.credit.floor() as usize).min(cap - s.emitted);
            if due == 0 {
                continue;
            }
            s.credit -= due as f64;

            let index = index.get_or_insert_with(|| self.placement_index(state));
            for _ in 0..due {
                let mut accepted = None;
                for _ in 0..INJECTION_TRIES {
                    let (u, v): (f64, f64) = {
                        let rng = &mut self.sources[k].rng;
                        (rng.gen(), rng.gen())
                    };
                    let candidate = self.candidate(k, origin + edge_u * u + edge_v * v);
                    if self.accept(state, index, &candidate, None) {
                        accepted = Some(candidate);
                        break;
                    }
                }
                // Bodies that cannot be placed are dropped, not deferred.
                self.sources[k].emitted += 1;
                if let Some(candidate) = accepted {
                    self.place(k, state, index, candidate);
                    total += 1;
                }
            }
        }
        total
    }

    fn candidate(&mut self, k: usize, center: DVec3) -> Candidate {
        let s = &mut self.sources[k];
        let scale = s.source.size.sample(&mut s.rng);
        let spheres = s.source.shape.scaled(scale);
        let volume = s.source.shape.unit_volume() * scale.powi(3);
        let (orientation, com) = if s.source.shape.is_clump() {
            (random_orientation(&mut s.rng), mass_properties(&spheres, 1.0).center)
        } else {
            (DQuat::IDENTITY, DVec3::ZERO)
        };
        let world = spheres
            .iter()
            .map(|c| (center + orientation * (c.offset - com), c.radius))
            .collect();
        Candidate {
            spheres,
            world,
            center,
            orientation,
            volume,
        }
    }

    fn accept(
        &self,
        state: &SimulationState,
        index: &PlacementIndex,
        candidate: &Candidate,
        region: Option<&Aabb>,
    ) -> bool {
        candidate.world.iter().all(|&(p, r)| {
            let inside = region.map_or(true, |b| {
                b.contains(p - DVec3::splat(r)) && b.contains(p + DVec3::splat(r))
            });
            inside && !index.overlaps(p, r) && !self.clearance.touches(&state.walls, p, r)
        })
    }

    fn place(&self, k: usize, state: &mut SimulationState, index: &mut PlacementIndex, candidate: Candidate) {
        let s = &self.sources[k];
        for &(p, r) in &candidate.world {
            index.insert(p, r);
        }
        match s.source.shape {
            ParticleShape::Sphere => {
                state.particles.push_sphere(
                    candidate.center,
                    s.source.velocity,
                    candidate.spheres[0].radius,
                    s.source.material,
                    s.density,
                );
            }
            ParticleShape::Clump { .. } => {
                state.clumps.spawn(
                    &mut state.particles,
                    &candidate.spheres,
                    candidate.center,
                    candidate.orientation,
                    s.source.velocity,
                    s.source.material,
                    s.density,
                );
            }
        }
    }
}

//! Candidate-pair search.
//!
//! Rebuilt wholesale every step. Particle-particle candidates come from
//! either the uniform grid or a box tree; particle-wall candidates always
//! come from a tree built once over the static wall triangles.

use serde::{Deserialize, Serialize};

use crate::aabb::Aabb;
use crate::bvh::BoundingVolumeTree;
use crate::neighbor::UniformGrid;
use crate::particle::{Body, ParticleStore};
use crate::wall::WallMesh;

/// Radius spread up to which [`BroadPhaseKind::Auto`] picks the grid.
pub const GRID_RADIUS_RATIO: f64 = 2.0;

/// Spatial index used for particle-particle candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadPhaseKind {
    /// Grid for near-uniform radii, tree otherwise.
    #[default]
    Auto,
    /// Uniform grid.
    Grid,
    /// Bounding volume hierarchy.
    Tree,
}

impl BroadPhaseKind {
    /// Resolve `Auto` against the current radius spread.
    pub fn resolve(self, particles: &ParticleStore) -> BroadPhaseKind {
        match self {
            BroadPhaseKind::Auto => match (particles.min_radius(), particles.max_radius()) {
                (Some(lo), Some(hi)) if hi > GRID_RADIUS_RATIO * lo => BroadPhaseKind::Tree,
                _ => BroadPhaseKind::Grid,
            },
            other => other,
        }
    }
}

/// Candidate pairs produced by one broad-phase pass.
#[derive(Debug, Clone, Default)]
pub struct CandidatePairs {
    /// Store index pairs `(i, j)` with `i < j`, each reported once.
    pub particles: Vec<(usize, usize)>,
    /// `(store index, triangle index)` pairs, grouped by store index.
    pub walls: Vec<(usize, usize)>,
}

impl CandidatePairs {
    /// Drop all pairs, keeping capacity.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.walls.clear();
    }
}

/// Broad phase state reused across steps.
#[derive(Debug)]
pub struct BroadPhase {
    kind: BroadPhaseKind,
    cell_factor: f64,
    grid: UniformGrid,
    wall_tree: BoundingVolumeTree,
    boxes: Vec<Aabb>,
}

impl BroadPhase {
    /// `cell_factor` scales the largest diameter to give the grid cell size.
    pub fn new(kind: BroadPhaseKind, cell_factor: f64, walls: &WallMesh) -> Self {
        let wall_boxes: Vec<Aabb> = walls.triangles().iter().map(|t| t.aabb()).collect();
        Self {
            kind,
            cell_factor,
            grid: UniformGrid::new(),
            wall_tree: BoundingVolumeTree::build(&wall_boxes),
            boxes: Vec::new(),
        }
    }

    /// Configured (unresolved) index kind.
    pub fn kind(&self) -> BroadPhaseKind {
        self.kind
    }

    /// Fill `out` with every candidate pair whose boxes overlap.
    pub fn find_candidates(&mut self, particles: &ParticleStore, out: &mut CandidatePairs) {
        out.clear();
        let n = particles.len();
        if n == 0 {
            return;
        }

        self.boxes.clear();
        self.boxes.extend(
            particles
                .position
                .iter()
                .zip(&particles.radius)
                .map(|(&p, &r)| Aabb::around_sphere(p, r)),
        );

        let same_clump = |i: usize, j: usize| {
            matches!((particles.body[i], particles.body[j]),
                (Body::Clump(a), Body::Clump(b)) if a == b)
        };

        match self.kind.resolve(particles) {
            BroadPhaseKind::Grid | BroadPhaseKind::Auto => {
                let max_diameter = 2.0 * particles.max_radius().unwrap_or(0.0);
                let cell = (self.cell_factor * max_diameter).max(f64::MIN_POSITIVE);
                let bounds = particles.bounds();
                self.grid.rebuild(&particles.position, &bounds, cell);
                for i in 0..n {
                    let bi = self.boxes[i];
                    let boxes = &self.boxes;
                    self.grid.for_each_candidate(i, |j| {
                        if bi.overlaps(&boxes[j]) && !same_clump(i, j) {
                            out.particles.push((i, j));
                        }
                    });
                }
            }
            BroadPhaseKind::Tree => {
                let tree = BoundingVolumeTree::build(&self.boxes);
                for i in 0..n {
                    tree.query(&self.boxes[i], |j| {
                        if j > i && !same_clump(i, j) {
                            out.particles.push((i, j));
                        }
                    });
                }
            }
        }

        if !self.wall_tree.is_empty() {
            for i in 0..n {
                let start = out.walls.len();
                self.wall_tree.query(&self.boxes[i], |t| out.walls.push((i, t)));
                out.walls[start..].sort_unstable();
            }
        }
    }
}

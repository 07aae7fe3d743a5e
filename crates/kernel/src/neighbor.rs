//! Uniform-grid broad phase.
//!
//! Uses sorted-index + cell-offset arrays (a counting sort) rather than a
//! `HashMap`, so rebuilds are a few linear passes with no per-cell
//! allocation. The grid is re-fitted to the particle bounding box on every
//! rebuild, so it never needs a fixed domain.

use glam::DVec3;

use crate::aabb::Aabb;

/// Dense uniform grid over the current particle bounding box.
///
/// Cell size must be at least the largest sphere diameter so that every
/// touching pair lies within the 3x3x3 block around either sphere's cell.
#[derive(Debug, Default)]
pub struct UniformGrid {
    cell_size: f64,
    grid_min: DVec3,
    grid_dims: [usize; 3],
    /// Cell index for each particle (parallel to particle arrays).
    cell_indices: Vec<u32>,
    /// Particle indices sorted by cell index.
    sorted_indices: Vec<u32>,
    /// Start offset in `sorted_indices` for each cell.
    cell_offsets: Vec<u32>,
    /// Number of particles in each cell.
    cell_counts: Vec<u32>,
}

impl UniformGrid {
    /// Empty grid; call [`UniformGrid::rebuild`] before querying.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cell edge length.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Cells per axis.
    pub fn dims(&self) -> [usize; 3] {
        self.grid_dims
    }

    /// Total number of cells.
    fn total_cells(&self) -> usize {
        self.grid_dims[0] * self.grid_dims[1] * self.grid_dims[2]
    }

    /// Map a position to its (clamped) cell coordinates.
    #[inline]
    fn pos_to_cell(&self, p: DVec3) -> [usize; 3] {
        let rel = (p - self.grid_min) / self.cell_size;
        let clamp = |v: f64, dim: usize| (v.floor().max(0.0) as usize).min(dim - 1);
        [
            clamp(rel.x, self.grid_dims[0]),
            clamp(rel.y, self.grid_dims[1]),
            clamp(rel.z, self.grid_dims[2]),
        ]
    }

    /// Flat cell index.
    #[inline]
    fn cell_hash(&self, c: [usize; 3]) -> usize {
        c[0] + c[1] * self.grid_dims[0] + c[2] * self.grid_dims[0] * self.grid_dims[1]
    }

    /// Re-fit the grid to `bounds` and bin every position.
    ///
    /// The cell size starts at `min_cell_size` and is enlarged when the grid
    /// would exceed `8 n + 64` cells (sparse scenes with far-flung particles).
    pub fn rebuild(&mut self, positions: &[DVec3], bounds: &Aabb, min_cell_size: f64) {
        debug_assert!(min_cell_size > 0.0, "cell size must be positive");
        let n = positions.len();
        let extent = bounds.extent().max(DVec3::ZERO);
        let max_cells = (8 * n + 64) as f64;

        let mut cell_size = min_cell_size;
        let mut dims = Self::dims_for(extent, cell_size);
        let cells = |d: [usize; 3]| d.iter().map(|&v| v as f64).product::<f64>();
        while cells(dims) > max_cells {
            cell_size *= (cells(dims) / max_cells).cbrt().max(1.01);
            dims = Self::dims_for(extent, cell_size);
        }

        self.cell_size = cell_size;
        self.grid_min = bounds.min;
        self.grid_dims = dims;
        let total_cells = self.total_cells();

        // --- 1. Cell index for each particle ---
        self.cell_indices.clear();
        self.cell_indices.reserve(n);
        for &p in positions {
            let cell = self.cell_hash(self.pos_to_cell(p));
            self.cell_indices.push(cell as u32);
        }

        // --- 2. Count particles per cell ---
        self.cell_counts.clear();
        self.cell_counts.resize(total_cells, 0);
        for &ci in &self.cell_indices {
            self.cell_counts[ci as usize] += 1;
        }

        // --- 3. Prefix sum ---
        self.cell_offsets.clear();
        self.cell_offsets.resize(total_cells, 0);
        let mut running = 0u32;
        for c in 0..total_cells {
            self.cell_offsets[c] = running;
            running += self.cell_counts[c];
        }

        // --- 4. Scatter into sorted order ---
        self.sorted_indices.clear();
        self.sorted_indices.resize(n, 0);
        let mut write_heads = self.cell_offsets.clone();
        for (i, &ci) in self.cell_indices.iter().enumerate() {
            let head = &mut write_heads[ci as usize];
            self.sorted_indices[*head as usize] = i as u32;
            *head += 1;
        }
    }

    fn dims_for(extent: DVec3, cell_size: f64) -> [usize; 3] {
        let d = |e: f64| ((e / cell_size).ceil() as usize).max(1);
        [d(extent.x), d(extent.y), d(extent.z)]
    }

    /// Call `f(j)` for every particle `j > i` binned in the 3x3x3 block
    /// around particle `i`'s cell. No distance filtering is done here.
    pub fn for_each_candidate<F>(&self, i: usize, mut f: F)
    where
        F: FnMut(usize),
    {
        let cell = self.cell_indices[i] as usize;
        let plane = self.grid_dims[0] * self.grid_dims[1];
        let c = [
            cell % self.grid_dims[0],
            (cell / self.grid_dims[0]) % self.grid_dims[1],
            cell / plane,
        ];

        for dz in -1i64..=1 {
            let nz = c[2] as i64 + dz;
            if nz < 0 || nz >= self.grid_dims[2] as i64 {
                continue;
            }
            for dy in -1i64..=1 {
                let ny = c[1] as i64 + dy;
                if ny < 0 || ny >= self.grid_dims[1] as i64 {
                    continue;
                }
                for dx in -1i64..=1 {
                    let nx = c[0] as i64 + dx;
                    if nx < 0 || nx >= self.grid_dims[0] as i64 {
                        continue;
                    }
                    let neighbor = self.cell_hash([nx as usize, ny as usize, nz as usize]);
                    let start = self.cell_offsets[neighbor] as usize;
                    let count = self.cell_counts[neighbor] as usize;
                    for &j in &self.sorted_indices[start..start + count] {
                        let j = j as usize;
                        if j > i {
                            f(j);
                        }
                    }
                }
            }
        }
    }
}

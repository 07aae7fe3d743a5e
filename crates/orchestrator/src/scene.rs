//! Scene assembly: turns a validated [`SceneConfig`] into the immutable
//! tables a run needs and builds kernels from them.

use std::path::Path;
use std::sync::Arc;

use glam::DVec3;
use kernel::{
    ConfigError, DemKernel, ExecutionBackend, KernelSettings, MaterialTable, ParticleFactory,
    ParticleSource, SimulationState, TimestepBound, WallMesh,
};
use serde::Serialize;
use tracing::info;

use crate::config::SceneConfig;
use crate::error::SetupError;

/// Size figures the scheduler decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SceneEstimate {
    /// Peak body count (clumps count once).
    pub peak_bodies: usize,
    /// Peak sphere count (clump constituents counted individually).
    pub peak_spheres: usize,
    /// Whether any source emits clumps.
    pub has_clumps: bool,
}

/// An assembled, validated scene. Cheap to clone; every run built from it
/// owns its own state.
#[derive(Debug, Clone)]
pub struct Scene {
    name: String,
    materials: Arc<MaterialTable>,
    walls: Arc<WallMesh>,
    factory: ParticleFactory,
    dt: f64,
    bound: Option<TimestepBound>,
    settings: KernelSettings,
    gravity: DVec3,
    duration: f64,
    output_stride: u64,
    geometry_reference: String,
}

impl Scene {
    /// Load a scene file. Relative geometry paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let config = SceneConfig::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::assemble(&config, base_dir)
    }

    /// Validate and assemble a parsed configuration.
    pub fn assemble(config: &SceneConfig, base_dir: &Path) -> Result<Self, SetupError> {
        config.validate().map_err(SetupError::Invalid)?;

        let materials = MaterialTable::new(config.materials.clone()).map_err(ConfigError::from)?;
        let walls = config.geometry.build(base_dir)?;

        let mut sources = Vec::with_capacity(config.sources.len());
        for (source_index, s) in config.sources.iter().enumerate() {
            let material = materials
                .id_of(&s.material)
                .ok_or_else(|| SetupError::UnknownMaterial {
                    source_index,
                    name: s.material.clone(),
                })?;
            sources.push(ParticleSource {
                kind: s.kind.clone(),
                material,
                size: s.size,
                shape: s.shape.clone(),
                velocity: s.velocity,
            });
        }
        let factory = ParticleFactory::new(sources, &materials, &walls, config.seed)?;

        let bound = TimestepBound::from_radii(&materials, factory.min_radii());
        let dt = match &bound {
            Some(bound) => bound.resolve(config.timestep, config.timestep_safety)?,
            None => config.timestep.ok_or_else(|| {
                SetupError::Invalid("a scene without sources needs an explicit timestep".to_string())
            })?,
        };

        let settings = KernelSettings {
            broad_phase: config.broad_phase,
            grid_cell_factor: config.grid_cell_factor,
            max_overlap_fraction: config.max_overlap_fraction,
            domain: config.domain,
        };
        settings.validate()?;

        info!(
            scene = %config.name,
            materials = materials.len(),
            walls = walls.len(),
            sources = config.sources.len(),
            dt,
            critical = ?bound.map(|b| b.critical),
            "scene assembled"
        );

        Ok(Self {
            name: config.name.clone(),
            materials: Arc::new(materials),
            walls: Arc::new(walls),
            factory,
            dt,
            bound,
            settings,
            gravity: config.gravity,
            duration: config.duration,
            output_stride: config.output_stride,
            geometry_reference: config.geometry.reference(),
        })
    }

    /// Scene name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working timestep.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Rayleigh critical timestep, if any source defines a radius.
    pub fn critical_timestep(&self) -> Option<f64> {
        self.bound.map(|b| b.critical)
    }

    /// Simulated duration.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Steps needed to cover the duration.
    pub fn total_steps(&self) -> u64 {
        (self.duration / self.dt).ceil() as u64
    }

    /// Frame stride.
    pub fn output_stride(&self) -> u64 {
        self.output_stride
    }

    /// Material table.
    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    /// Material names in id order.
    pub fn material_names(&self) -> Vec<String> {
        self.materials.iter().map(|(_, m)| m.name.clone()).collect()
    }

    /// Wall mesh.
    pub fn walls(&self) -> &WallMesh {
        &self.walls
    }

    /// Geometry reference for trajectory headers.
    pub fn geometry_reference(&self) -> &str {
        &self.geometry_reference
    }

    /// Kernel settings derived from the configuration.
    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// Peak counts over the full duration.
    pub fn estimate(&self) -> SceneEstimate {
        SceneEstimate {
            peak_bodies: self.factory.estimate_peak(self.duration),
            peak_spheres: self.factory.estimate_peak_spheres(self.duration),
            has_clumps: self.factory.has_clumps(),
        }
    }

    /// Fresh kernel with every volume fill placed, plus the factory that
    /// injects during the run.
    pub fn build_kernel<B: ExecutionBackend>(
        &self,
        backend: B,
    ) -> Result<(DemKernel<B>, ParticleFactory), SetupError> {
        let mut state = SimulationState::new(
            Arc::clone(&self.materials),
            Arc::clone(&self.walls),
            self.gravity,
            self.dt,
        );
        let mut factory = self.factory.clone();
        factory.fill(&mut state);
        let kernel = DemKernel::new(state, self.settings.clone(), backend)?;
        Ok((kernel, factory))
    }
}

//! Scene and execution-policy configuration.

use std::fs;
use std::path::{Path, PathBuf};

use glam::DVec3;
use kernel::{Aabb, BroadPhaseKind, Material, ParticleShape, SizeDistribution, SourceKind};
use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::geometry::GeometryConfig;
use crate::retry::RetryPolicy;
use crate::scheduler::ExecutionMode;

/// Complete description of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Human-readable scene name
    pub name: String,
    /// Boundary geometry
    #[serde(default)]
    pub geometry: GeometryConfig,
    /// Materials, referenced by name from sources
    pub materials: Vec<Material>,
    /// Particle sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Gravity vector (m/s^2)
    #[serde(default = "default_gravity")]
    pub gravity: DVec3,
    /// Simulated duration (seconds)
    pub duration: f64,
    /// Fixed timestep; derived from the Rayleigh bound when absent
    #[serde(default)]
    pub timestep: Option<f64>,
    /// Fraction of the critical timestep used when `timestep` is absent
    #[serde(default = "default_timestep_safety")]
    pub timestep_safety: f64,
    /// Write a frame every this many steps
    #[serde(default = "default_output_stride")]
    pub output_stride: u64,
    /// Bodies leaving this box are removed
    #[serde(default)]
    pub domain: Option<Aabb>,
    /// Seed for every stochastic choice
    #[serde(default)]
    pub seed: u64,
    /// Particle-particle spatial index
    #[serde(default)]
    pub broad_phase: BroadPhaseKind,
    /// Overlap (fraction of the smaller radius) that aborts the run
    #[serde(default = "default_max_overlap_fraction")]
    pub max_overlap_fraction: f64,
    /// Grid cell size in multiples of the largest diameter
    #[serde(default = "default_grid_cell_factor")]
    pub grid_cell_factor: f64,
}

/// A particle source as written in a scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Material name
    pub material: String,
    /// Fill or injection parameters
    pub kind: SourceKind,
    /// Radius distribution
    pub size: SizeDistribution,
    /// Body shape
    #[serde(default)]
    pub shape: ParticleShape,
    /// Initial velocity (m/s)
    #[serde(default)]
    pub velocity: DVec3,
}

// Default values
fn default_gravity() -> DVec3 {
    DVec3::new(0.0, -9.81, 0.0)
}

fn default_timestep_safety() -> f64 {
    kernel::DEFAULT_SAFETY_FRACTION
}

fn default_output_stride() -> u64 {
    100
}

fn default_max_overlap_fraction() -> f64 {
    0.1
}

fn default_grid_cell_factor() -> f64 {
    2.0
}

impl SceneConfig {
    /// Load and validate a scene from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| SetupError::io(path, e))?;
        Self::from_json(&contents)
    }

    /// Parse and validate a scene from JSON text
    pub fn from_json(json: &str) -> Result<Self, SetupError> {
        let config: SceneConfig =
            serde_json::from_str(json).map_err(|e| SetupError::Parse(e.to_string()))?;
        config.validate().map_err(SetupError::Invalid)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.duration > 0.0 && self.duration.is_finite()) {
            return Err(format!("duration must be positive, got {}", self.duration));
        }
        if self.output_stride == 0 {
            return Err("output_stride must be at least 1".to_string());
        }
        if self.materials.is_empty() {
            return Err("at least one material is required".to_string());
        }
        if !(self.timestep_safety > 0.0 && self.timestep_safety <= 1.0) {
            return Err(format!(
                "timestep_safety must be in (0, 1], got {}",
                self.timestep_safety
            ));
        }
        if let Some(dt) = self.timestep {
            if !(dt > 0.0 && dt.is_finite()) {
                return Err(format!("timestep must be positive, got {dt}"));
            }
        }
        if !self.gravity.is_finite() {
            return Err("gravity must be finite".to_string());
        }
        if let Some(domain) = &self.domain {
            let e = domain.extent();
            if !domain.is_valid() || e.x <= 0.0 || e.y <= 0.0 || e.z <= 0.0 {
                return Err(format!("domain min must be below max on every axis, got {domain:?}"));
            }
        }
        for (i, s) in self.sources.iter().enumerate() {
            if !self.materials.iter().any(|m| m.name == s.material) {
                return Err(format!("source {i} uses unknown material {:?}", s.material));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Execution policy
// ---------------------------------------------------------------------------

fn default_immediate_threshold() -> usize {
    5_000
}

fn default_progress_interval() -> u64 {
    500
}

fn default_memory_budget() -> u64 {
    8 * 1024 * 1024 * 1024
}

fn default_workers() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("runs")
}

/// Scheduler-level policy: where runs execute and how they report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Largest peak sphere count run immediately (spheres only)
    #[serde(default = "default_immediate_threshold")]
    pub immediate_threshold: usize,
    /// Steps between progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// Memory available to one queued run (bytes)
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,
    /// Queued worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Threads per queued run; rayon's default when absent
    #[serde(default)]
    pub threads_per_run: Option<usize>,
    /// Retries for dispatch and storage
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Directory for queued-run trajectories
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Override the size-based mode choice
    #[serde(default)]
    pub force_mode: Option<ExecutionMode>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            immediate_threshold: default_immediate_threshold(),
            progress_interval: default_progress_interval(),
            memory_budget_bytes: default_memory_budget(),
            workers: default_workers(),
            threads_per_run: None,
            retry: RetryPolicy::default(),
            output_dir: default_output_dir(),
            force_mode: None,
        }
    }
}

impl ExecutionPolicy {
    /// Load a policy from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| SetupError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|e| SetupError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "name": "pile",
        "materials": [{
            "name": "glass",
            "youngs_modulus": 6.0e7,
            "poisson_ratio": 0.25,
            "density": 2500.0,
            "restitution": 0.6,
            "friction": 0.4
        }],
        "sources": [{
            "material": "glass",
            "kind": {
                "type": "volume_fill",
                "region": {"min": [0, 0, 0], "max": [0.1, 0.1, 0.1]},
                "target_count": 100
            },
            "size": {"type": "fixed", "radius": 0.004}
        }],
        "duration": 0.5
    }"#;

    #[test]
    fn defaults_are_applied() {
        let config = SceneConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.gravity, DVec3::new(0.0, -9.81, 0.0));
        assert_eq!(config.output_stride, 100);
        assert_eq!(config.seed, 0);
        assert_eq!(config.broad_phase, BroadPhaseKind::Auto);
        assert!((config.max_overlap_fraction - 0.1).abs() < 1e-12);
        assert!((config.timestep_safety - 0.2).abs() < 1e-12);
        assert_eq!(config.geometry, GeometryConfig::None);
        assert_eq!(config.sources[0].shape, ParticleShape::Sphere);
        assert_eq!(config.materials[0].wall_friction, 0.5);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = SceneConfig::from_json(MINIMAL).unwrap();

        let mut c = base.clone();
        c.duration = 0.0;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.output_stride = 0;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.sources[0].material = "steel".to_string();
        assert!(c.validate().unwrap_err().contains("steel"));

        let mut c = base.clone();
        c.domain = Some(Aabb::new(DVec3::ONE, DVec3::ZERO));
        assert!(c.validate().is_err());

        let mut c = base;
        c.materials.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            SceneConfig::from_json("{ not json"),
            Err(SetupError::Parse(_))
        ));
    }

    #[test]
    fn policy_defaults() {
        let p: ExecutionPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(p, ExecutionPolicy::default());
        assert_eq!(p.immediate_threshold, 5_000);
        assert_eq!(p.retry.max_attempts, 3);
        assert_eq!(p.memory_budget_bytes, 8 << 30);
    }
}

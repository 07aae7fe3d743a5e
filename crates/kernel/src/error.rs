//! Error types for kernel setup and stepping.
//!
//! Setup problems surface as [`ConfigError`] before the first step. Problems
//! found while stepping surface as [`StepError`] and end the run.

use std::fmt;

use crate::contact::ContactKey;
use crate::particle::ParticleId;

/// Invalid boundary geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Triangle with (near) zero area.
    DegenerateTriangle {
        /// Triangle index in the input mesh.
        index: usize,
        /// Computed area.
        area: f64,
    },
    /// Triangle referencing a vertex that does not exist.
    IndexOutOfRange {
        /// Triangle index in the input mesh.
        triangle: usize,
        /// Offending vertex index.
        vertex: u32,
        /// Number of vertices supplied.
        count: usize,
    },
    /// NaN or infinite vertex coordinate.
    NonFiniteVertex {
        /// Vertex index.
        index: usize,
    },
    /// Normal list whose length differs from the triangle list.
    NormalCountMismatch {
        /// Number of normals.
        normals: usize,
        /// Number of triangles.
        triangles: usize,
    },
}

/// Invalid material parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialError {
    /// Empty material set.
    Empty,
    /// Zero, negative or non-finite elastic modulus.
    NonPositiveModulus {
        /// Material name.
        material: String,
        /// Supplied value.
        value: f64,
    },
    /// Poisson ratio outside (-1, 0.5).
    PoissonOutOfRange {
        /// Material name.
        material: String,
        /// Supplied value.
        value: f64,
    },
    /// Zero, negative or non-finite density.
    NonPositiveDensity {
        /// Material name.
        material: String,
        /// Supplied value.
        value: f64,
    },
    /// Restitution outside (0, 1].
    RestitutionOutOfRange {
        /// Material name.
        material: String,
        /// Supplied value.
        value: f64,
    },
    /// Negative friction-type coefficient.
    NegativeCoefficient {
        /// Material name.
        material: String,
        /// Coefficient name.
        field: &'static str,
        /// Supplied value.
        value: f64,
    },
    /// Two materials with the same name.
    DuplicateName(String),
    /// Reference to a material id past the end of the table.
    UnknownId(usize),
}

/// Setup-time configuration failure. Always reported before stepping.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Geometry failed validation.
    Geometry(GeometryError),
    /// Materials failed validation.
    Material(MaterialError),
    /// Timestep is zero, negative or not finite.
    InvalidTimestep(f64),
    /// Timestep above the Rayleigh critical value.
    TimestepTooLarge {
        /// Requested timestep.
        timestep: f64,
        /// Critical timestep for the material set.
        critical: f64,
    },
    /// A particle source is malformed.
    InvalidSource {
        /// Source index.
        index: usize,
        /// Human readable reason.
        reason: String,
    },
    /// Any other out-of-range kernel setting.
    InvalidSetting(String),
}

/// Failure detected while advancing the simulation. Terminal for the run.
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// Penetration deeper than the allowed fraction of the smaller radius.
    ExcessiveOverlap {
        /// Step during which the overlap was found.
        step: u64,
        /// Offending pair.
        contact: ContactKey,
        /// Measured overlap.
        overlap: f64,
        /// Allowed overlap.
        limit: f64,
    },
    /// NaN or infinite particle state.
    NonFinite {
        /// Step after which the state was checked.
        step: u64,
        /// Offending particle.
        particle: ParticleId,
    },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateTriangle { index, area } => {
                write!(f, "wall triangle {index} is degenerate (area {area:e})")
            }
            Self::IndexOutOfRange { triangle, vertex, count } => write!(
                f,
                "wall triangle {triangle} references vertex {vertex}, mesh has {count} vertices"
            ),
            Self::NonFiniteVertex { index } => write!(f, "vertex {index} has a non-finite coordinate"),
            Self::NormalCountMismatch { normals, triangles } => {
                write!(f, "{normals} normals supplied for {triangles} triangles")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

impl fmt::Display for MaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "at least one material is required"),
            Self::NonPositiveModulus { material, value } => {
                write!(f, "material '{material}': Young's modulus must be positive, got {value}")
            }
            Self::PoissonOutOfRange { material, value } => {
                write!(f, "material '{material}': Poisson ratio must lie in (-1, 0.5), got {value}")
            }
            Self::NonPositiveDensity { material, value } => {
                write!(f, "material '{material}': density must be positive, got {value}")
            }
            Self::RestitutionOutOfRange { material, value } => {
                write!(f, "material '{material}': restitution must lie in (0, 1], got {value}")
            }
            Self::NegativeCoefficient { material, field, value } => {
                write!(f, "material '{material}': {field} must be non-negative, got {value}")
            }
            Self::DuplicateName(name) => write!(f, "material name '{name}' is used more than once"),
            Self::UnknownId(id) => write!(f, "unknown material id {id}"),
        }
    }
}

impl std::error::Error for MaterialError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geometry(e) => e.fmt(f),
            Self::Material(e) => e.fmt(f),
            Self::InvalidTimestep(dt) => write!(f, "timestep must be positive and finite, got {dt}"),
            Self::TimestepTooLarge { timestep, critical } => write!(
                f,
                "timestep {timestep:e} s exceeds the critical timestep {critical:e} s"
            ),
            Self::InvalidSource { index, reason } => write!(f, "particle source {index}: {reason}"),
            Self::InvalidSetting(msg) => write!(f, "invalid setting: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Geometry(e) => e.source(),
            Self::Material(e) => e.source(),
            _ => None,
        }
    }
}

impl From<GeometryError> for ConfigError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

impl From<MaterialError> for ConfigError {
    fn from(e: MaterialError) -> Self {
        Self::Material(e)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExcessiveOverlap {
                step,
                contact,
                overlap,
                limit,
            } => write!(
                f,
                "step {step}: overlap {overlap:e} m on contact {contact} exceeds limit {limit:e} m"
            ),
            Self::NonFinite { step, particle } => {
                write!(f, "step {step}: particle {particle} has non-finite state")
            }
        }
    }
}

impl std::error::Error for StepError {}

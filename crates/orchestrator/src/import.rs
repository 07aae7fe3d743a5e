//! Import of third-party particle libraries.
//!
//! The library format lists materials by shear modulus (GPa), Poisson ratio
//! and density, pairwise interaction coefficients (with `"wall"` as the
//! partner name for boundary contacts) and particle templates built from
//! spheres given in millimetres. Import is a pure data transform: it yields
//! [`Material`]s and [`ImportedParticle`] templates, nothing runs.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use glam::DVec3;
use kernel::clump::CLUMP_SPHERE_RANGE;
use kernel::{ClumpSphere, Material, ParticleShape, SizeDistribution, SourceKind};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SourceConfig;

/// Interaction partner name denoting boundary walls.
pub const WALL_PARTNER: &str = "wall";

/// Import failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    /// Library file could not be read.
    Io(String),
    /// Library JSON did not parse.
    Parse(String),
    /// A material has no self-interaction entry.
    MissingInteraction(String),
    /// An interaction or particle names an unknown material.
    UnknownMaterial {
        /// Where the name appeared.
        context: String,
        /// The name.
        name: String,
    },
    /// A particle template is unusable.
    InvalidParticle {
        /// Template name.
        name: String,
        /// What is wrong.
        reason: String,
    },
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "failed to read particle library: {msg}"),
            Self::Parse(msg) => write!(f, "failed to parse particle library: {msg}"),
            Self::MissingInteraction(name) => write!(f, "material {name:?} has no interaction with itself"),
            Self::UnknownMaterial { context, name } => write!(f, "{context} refers to unknown material {name:?}"),
            Self::InvalidParticle { name, reason } => write!(f, "particle {name:?}: {reason}"),
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug, Deserialize)]
struct Library {
    materials: Vec<LibraryMaterial>,
    #[serde(default)]
    interactions: Vec<LibraryInteraction>,
    #[serde(default)]
    particles: Vec<LibraryParticle>,
}

#[derive(Debug, Deserialize)]
struct LibraryMaterial {
    name: String,
    shear_modulus_gpa: f64,
    poisson: f64,
    density: f64,
}

#[derive(Debug, Deserialize)]
struct LibraryInteraction {
    first: String,
    second: String,
    restitution: f64,
    static_friction: f64,
    #[serde(default)]
    rolling_friction: f64,
}

#[derive(Debug, Deserialize)]
struct LibrarySphere {
    x_mm: f64,
    y_mm: f64,
    z_mm: f64,
    radius_mm: f64,
}

#[derive(Debug, Deserialize)]
struct LibraryParticle {
    name: String,
    material: String,
    spheres: Vec<LibrarySphere>,
}

/// A particle template ready to become a source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedParticle {
    /// Template name
    pub name: String,
    /// Material name
    pub material: String,
    /// Shape in units of the size radius
    pub shape: ParticleShape,
    /// Size; fixed, since templates have one scale
    pub size: SizeDistribution,
}

impl ImportedParticle {
    /// Source emitting this template.
    pub fn to_source_config(&self, kind: SourceKind, velocity: DVec3) -> SourceConfig {
        SourceConfig {
            material: self.material.clone(),
            kind,
            size: self.size,
            shape: self.shape.clone(),
            velocity,
        }
    }
}

/// Everything a library yields.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedLibrary {
    /// Materials in library order
    pub materials: Vec<Material>,
    /// Particle templates in library order
    pub particles: Vec<ImportedParticle>,
}

impl ImportedLibrary {
    /// Template by name.
    pub fn particle(&self, name: &str) -> Option<&ImportedParticle> {
        self.particles.iter().find(|p| p.name == name)
    }
}

/// Read a library file.
pub fn import_file(path: impl AsRef<Path>) -> Result<ImportedLibrary, ImportError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|e| ImportError::Io(format!("{}: {e}", path.display())))?;
    import_str(&json)
}

/// Translate library JSON.
pub fn import_str(json: &str) -> Result<ImportedLibrary, ImportError> {
    let library: Library = serde_json::from_str(json).map_err(|e| ImportError::Parse(e.to_string()))?;

    let known: HashMap<&str, &LibraryMaterial> =
        library.materials.iter().map(|m| (m.name.as_str(), m)).collect();
    let mut own: HashMap<&str, &LibraryInteraction> = HashMap::new();
    let mut wall: HashMap<&str, &LibraryInteraction> = HashMap::new();

    for i in &library.interactions {
        for name in [&i.first, &i.second] {
            if name != WALL_PARTNER && !known.contains_key(name.as_str()) {
                return Err(ImportError::UnknownMaterial {
                    context: format!("interaction {}/{}", i.first, i.second),
                    name: name.clone(),
                });
            }
        }
        match (i.first.as_str(), i.second.as_str()) {
            (WALL_PARTNER, m) | (m, WALL_PARTNER) => {
                wall.insert(m, i);
            }
            (a, b) if a == b => {
                own.insert(a, i);
            }
            (a, b) => {
                // Mixed pairs are derived from the two materials' own values.
                debug!(first = a, second = b, "ignoring explicit cross-material interaction");
            }
        }
    }

    let mut materials = Vec::with_capacity(library.materials.len());
    for m in &library.materials {
        let inter = own
            .get(m.name.as_str())
            .ok_or_else(|| ImportError::MissingInteraction(m.name.clone()))?;
        let wall_friction = match wall.get(m.name.as_str()) {
            Some(w) => w.static_friction,
            None => {
                warn!(material = %m.name, "no wall interaction, using particle friction");
                inter.static_friction
            }
        };
        materials.push(Material {
            name: m.name.clone(),
            youngs_modulus: 2.0 * m.shear_modulus_gpa * 1e9 * (1.0 + m.poisson),
            poisson_ratio: m.poisson,
            density: m.density,
            restitution: inter.restitution,
            friction: inter.static_friction,
            wall_friction,
            rolling_friction: inter.rolling_friction,
        });
    }

    let particles = library
        .particles
        .iter()
        .map(|p| particle(p, &known))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ImportedLibrary { materials, particles })
}

fn particle(
    p: &LibraryParticle,
    known: &HashMap<&str, &LibraryMaterial>,
) -> Result<ImportedParticle, ImportError> {
    if !known.contains_key(p.material.as_str()) {
        return Err(ImportError::UnknownMaterial {
            context: format!("particle {}", p.name),
            name: p.material.clone(),
        });
    }
    let invalid = |reason: String| ImportError::InvalidParticle {
        name: p.name.clone(),
        reason,
    };
    if p.spheres.iter().any(|s| !(s.radius_mm > 0.0)) {
        return Err(invalid("sphere radius must be positive".to_string()));
    }
    let largest = p.spheres.iter().map(|s| s.radius_mm).fold(0.0, f64::max);

    let shape = match p.spheres.len() {
        0 => return Err(invalid("no spheres".to_string())),
        1 => ParticleShape::Sphere,
        n if !CLUMP_SPHERE_RANGE.contains(&n) => {
            return Err(invalid(format!(
                "{n} spheres, clumps take {} to {}",
                CLUMP_SPHERE_RANGE.start,
                CLUMP_SPHERE_RANGE.end - 1
            )));
        }
        _ => ParticleShape::Clump {
            spheres: p
                .spheres
                .iter()
                .map(|s| ClumpSphere {
                    offset: DVec3::new(s.x_mm, s.y_mm, s.z_mm) / largest,
                    radius: s.radius_mm / largest,
                })
                .collect(),
        },
    };

    Ok(ImportedParticle {
        name: p.name.clone(),
        material: p.material.clone(),
        shape,
        size: SizeDistribution::Fixed {
            radius: largest * 1e-3,
        },
    })
}

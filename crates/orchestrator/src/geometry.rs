//! Boundary geometry: STL loading and primitive wall builders.

use std::f64::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use glam::DVec3;
use kernel::WallMesh;
use serde::{Deserialize, Serialize};

use crate::error::SetupError;

/// Geometry section of a scene file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryConfig {
    /// No walls.
    #[default]
    None,
    /// Binary or ASCII STL file, relative to the scene file.
    Stl {
        /// File path
        path: PathBuf,
    },
    /// Inline indexed mesh.
    Mesh {
        /// Vertex positions
        vertices: Vec<DVec3>,
        /// Vertex index triples
        triangles: Vec<[u32; 3]>,
        /// Per-triangle normals; computed from the winding when absent
        #[serde(default)]
        normals: Option<Vec<DVec3>>,
    },
    /// Axis-aligned box without a lid.
    OpenBox {
        /// Minimum corner
        min: DVec3,
        /// Maximum corner; the top face at `max.y` is left open
        max: DVec3,
    },
    /// Horizontal square at `center`.
    Floor {
        /// Centre of the square
        center: DVec3,
        /// Half the edge length
        half_size: f64,
    },
    /// Conical hopper opening upwards, open at the outlet.
    Hopper {
        /// Centre of the outlet circle
        outlet_center: DVec3,
        /// Outlet radius
        outlet_radius: f64,
        /// Radius at the top rim
        top_radius: f64,
        /// Vertical distance from outlet to rim
        height: f64,
        /// Facets around the circumference
        #[serde(default = "default_segments")]
        segments: u32,
    },
    /// Flat-bottomed cylinder with a circular outlet in the centre of the floor.
    Silo {
        /// Centre of the outlet circle, on the floor plane
        outlet_center: DVec3,
        /// Outlet radius
        outlet_radius: f64,
        /// Cylinder radius
        radius: f64,
        /// Wall height above the floor
        height: f64,
        /// Facets around the circumference
        #[serde(default = "default_segments")]
        segments: u32,
    },
    /// Union of several parts.
    Compound {
        /// Parts, merged in order
        parts: Vec<GeometryConfig>,
    },
}

fn default_segments() -> u32 {
    32
}

impl GeometryConfig {
    /// Build the wall mesh. Relative STL paths resolve against `base_dir`.
    pub fn build(&self, base_dir: &Path) -> Result<WallMesh, SetupError> {
        let mesh = match self {
            GeometryConfig::None => WallMesh::empty(),
            GeometryConfig::Stl { path } => load_stl(&base_dir.join(path))?,
            GeometryConfig::Mesh {
                vertices,
                triangles,
                normals,
            } => WallMesh::from_indexed(vertices, triangles, normals.as_deref())?,
            GeometryConfig::OpenBox { min, max } => open_box(*min, *max)?,
            GeometryConfig::Floor { center, half_size } => floor(*center, *half_size)?,
            GeometryConfig::Hopper {
                outlet_center,
                outlet_radius,
                top_radius,
                height,
                segments,
            } => hopper(*outlet_center, *outlet_radius, *top_radius, *height, *segments)?,
            GeometryConfig::Silo {
                outlet_center,
                outlet_radius,
                radius,
                height,
                segments,
            } => silo(*outlet_center, *outlet_radius, *radius, *height, *segments)?,
            GeometryConfig::Compound { parts } => {
                let mut mesh = WallMesh::empty();
                for part in parts {
                    mesh.extend(part.build(base_dir)?);
                }
                mesh
            }
        };
        Ok(mesh)
    }

    /// Short reference recorded in trajectory headers.
    pub fn reference(&self) -> String {
        match self {
            GeometryConfig::None => "none".to_string(),
            GeometryConfig::Stl { path } => format!("stl:{}", path.display()),
            GeometryConfig::Mesh { triangles, .. } => format!("mesh:{}", triangles.len()),
            GeometryConfig::OpenBox { .. } => "open_box".to_string(),
            GeometryConfig::Floor { .. } => "floor".to_string(),
            GeometryConfig::Hopper { .. } => "hopper".to_string(),
            GeometryConfig::Silo { .. } => "silo".to_string(),
            GeometryConfig::Compound { parts } => {
                let names: Vec<String> = parts.iter().map(|p| p.reference()).collect();
                format!("compound[{}]", names.join(","))
            }
        }
    }
}

/// Load an STL file into a wall mesh
pub fn load_stl(path: &Path) -> Result<WallMesh, SetupError> {
    let file = File::open(path).map_err(|e| SetupError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let mesh = nom_stl::parse_stl(&mut reader).map_err(|e| SetupError::Stl {
        path: path.to_path_buf(),
        message: format!("{e:?}"),
    })?;

    let to_dvec = |v: [f32; 3]| DVec3::new(v[0] as f64, v[1] as f64, v[2] as f64);
    let soup = mesh.triangles().iter().map(|t| {
        let [a, b, c] = t.vertices();
        [to_dvec(a), to_dvec(b), to_dvec(c)]
    });
    Ok(WallMesh::from_triangles(soup)?)
}

fn quad(a: DVec3, b: DVec3, c: DVec3, d: DVec3) -> [[DVec3; 3]; 2] {
    [[a, b, c], [a, c, d]]
}

/// Five faces of an axis-aligned box, normals pointing inwards.
pub fn open_box(min: DVec3, max: DVec3) -> Result<WallMesh, SetupError> {
    let e = max - min;
    if !(e.x > 0.0 && e.y > 0.0 && e.z > 0.0) {
        return Err(SetupError::Invalid(format!(
            "open box needs min < max on every axis, got {min} .. {max}"
        )));
    }
    let p = |x: f64, y: f64, z: f64| DVec3::new(x, y, z);
    let (x0, y0, z0, x1, y1, z1) = (min.x, min.y, min.z, max.x, max.y, max.z);
    let faces = [
        // floor, +Y
        quad(p(x0, y0, z0), p(x0, y0, z1), p(x1, y0, z1), p(x1, y0, z0)),
        // x = x0, +X
        quad(p(x0, y0, z0), p(x0, y1, z0), p(x0, y1, z1), p(x0, y0, z1)),
        // x = x1, -X
        quad(p(x1, y0, z0), p(x1, y0, z1), p(x1, y1, z1), p(x1, y1, z0)),
        // z = z0, +Z
        quad(p(x0, y0, z0), p(x1, y0, z0), p(x1, y1, z0), p(x0, y1, z0)),
        // z = z1, -Z
        quad(p(x0, y0, z1), p(x0, y1, z1), p(x1, y1, z1), p(x1, y0, z1)),
    ];
    Ok(WallMesh::from_triangles(faces.into_iter().flatten())?)
}

/// Horizontal square facing +Y.
pub fn floor(center: DVec3, half_size: f64) -> Result<WallMesh, SetupError> {
    if !(half_size > 0.0 && half_size.is_finite()) {
        return Err(SetupError::Invalid(format!(
            "floor half_size must be positive, got {half_size}"
        )));
    }
    let h = half_size;
    let c = center;
    let faces = quad(
        c + DVec3::new(-h, 0.0, -h),
        c + DVec3::new(-h, 0.0, h),
        c + DVec3::new(h, 0.0, h),
        c + DVec3::new(h, 0.0, -h),
    );
    Ok(WallMesh::from_triangles(faces)?)
}

/// Faceted cone frustum around the vertical axis through `outlet_center`,
/// widening upwards, normals pointing at the axis.
pub fn hopper(
    outlet_center: DVec3,
    outlet_radius: f64,
    top_radius: f64,
    height: f64,
    segments: u32,
) -> Result<WallMesh, SetupError> {
    if !(outlet_radius > 0.0 && top_radius > outlet_radius && height > 0.0) {
        return Err(SetupError::Invalid(format!(
            "hopper needs 0 < outlet_radius < top_radius and height > 0, got \
             {outlet_radius}, {top_radius}, {height}"
        )));
    }
    if segments < 3 {
        return Err(SetupError::Invalid(format!(
            "hopper needs at least 3 segments, got {segments}"
        )));
    }
    let ring = |radius: f64, y: f64, k: u32| ring_point(outlet_center, radius, y, k, segments);
    let faces = (0..segments).flat_map(|k| {
        quad(
            ring(outlet_radius, 0.0, k),
            ring(outlet_radius, 0.0, k + 1),
            ring(top_radius, height, k + 1),
            ring(top_radius, height, k),
        )
    });
    Ok(WallMesh::from_triangles(faces)?)
}

fn ring_point(center: DVec3, radius: f64, y: f64, k: u32, segments: u32) -> DVec3 {
    let phi = TAU * k as f64 / segments as f64;
    center + DVec3::new(radius * phi.cos(), y, radius * phi.sin())
}

/// Annular floor around the outlet plus a vertical cylinder wall, normals
/// pointing up and at the axis respectively.
pub fn silo(
    outlet_center: DVec3,
    outlet_radius: f64,
    radius: f64,
    height: f64,
    segments: u32,
) -> Result<WallMesh, SetupError> {
    if !(outlet_radius > 0.0 && radius > outlet_radius && height > 0.0) {
        return Err(SetupError::Invalid(format!(
            "silo needs 0 < outlet_radius < radius and height > 0, got \
             {outlet_radius}, {radius}, {height}"
        )));
    }
    if segments < 3 {
        return Err(SetupError::Invalid(format!(
            "silo needs at least 3 segments, got {segments}"
        )));
    }
    let ring = |r: f64, y: f64, k: u32| ring_point(outlet_center, r, y, k, segments);
    let faces = (0..segments).flat_map(|k| {
        let floor = quad(
            ring(outlet_radius, 0.0, k),
            ring(outlet_radius, 0.0, k + 1),
            ring(radius, 0.0, k + 1),
            ring(radius, 0.0, k),
        );
        let wall = quad(
            ring(radius, 0.0, k),
            ring(radius, 0.0, k + 1),
            ring(radius, height, k + 1),
            ring(radius, height, k),
        );
        floor.into_iter().chain(wall)
    });
    Ok(WallMesh::from_triangles(faces)?)
}

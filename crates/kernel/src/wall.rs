//! Static triangulated boundary geometry.

use glam::DVec3;

use crate::aabb::Aabb;
use crate::error::GeometryError;

/// Which part of a triangle a closest-point query landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriangleFeature {
    /// Interior of the face.
    Face,
    /// Edge 0 = AB, 1 = BC, 2 = CA.
    Edge(u8),
    /// Vertex 0 = A, 1 = B, 2 = C.
    Vertex(u8),
}

/// Immutable wall triangle with its unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallTriangle {
    /// Corner positions A, B, C.
    pub vertices: [DVec3; 3],
    /// Unit normal.
    pub normal: DVec3,
}

impl WallTriangle {
    /// Build a triangle, rejecting degenerate input. `index` is only used for
    /// the error report.
    pub fn new(vertices: [DVec3; 3], index: usize) -> Result<Self, GeometryError> {
        let [a, b, c] = vertices;
        let cross = (b - a).cross(c - a);
        let area = 0.5 * cross.length();
        let longest = (b - a)
            .length_squared()
            .max((c - b).length_squared())
            .max((a - c).length_squared());
        // Area relative to the longest edge catches slivers as well as collapsed triangles.
        if !(area > 0.0) || area <= 1e-12 * longest {
            return Err(GeometryError::DegenerateTriangle { index, area });
        }
        Ok(Self {
            vertices,
            normal: cross / (2.0 * area),
        })
    }

    /// Build with a supplied normal. A zero normal falls back to the winding.
    pub fn with_normal(
        vertices: [DVec3; 3],
        normal: DVec3,
        index: usize,
    ) -> Result<Self, GeometryError> {
        let mut tri = Self::new(vertices, index)?;
        if let Some(n) = normal.try_normalize() {
            tri.normal = n;
        }
        Ok(tri)
    }

    /// Triangle area.
    pub fn area(&self) -> f64 {
        let [a, b, c] = self.vertices;
        0.5 * (b - a).cross(c - a).length()
    }

    /// Bounding box of the three corners.
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&self.vertices)
    }

    /// Signed distance from `p` to the triangle's plane.
    #[inline]
    pub fn plane_distance(&self, p: DVec3) -> f64 {
        (p - self.vertices[0]).dot(self.normal)
    }

    /// Closest point on the triangle to `p`, by clamped barycentric
    /// projection over the Voronoi regions of vertices, edges and face.
    pub fn closest_point(&self, p: DVec3) -> (DVec3, TriangleFeature) {
        let [a, b, c] = self.vertices;
        let ab = b - a;
        let ac = c - a;

        let ap = p - a;
        let d1 = ab.dot(ap);
        let d2 = ac.dot(ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return (a, TriangleFeature::Vertex(0));
        }

        let bp = p - b;
        let d3 = ab.dot(bp);
        let d4 = ac.dot(bp);
        if d3 >= 0.0 && d4 <= d3 {
            return (b, TriangleFeature::Vertex(1));
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return (a + v * ab, TriangleFeature::Edge(0));
        }

        let cp = p - c;
        let d5 = ab.dot(cp);
        let d6 = ac.dot(cp);
        if d6 >= 0.0 && d5 <= d6 {
            return (c, TriangleFeature::Vertex(2));
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return (a + w * ac, TriangleFeature::Edge(2));
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return (b + w * (c - b), TriangleFeature::Edge(1));
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        (a + ab * v + ac * w, TriangleFeature::Face)
    }
}

/// Set of wall triangles for one scene. Never modified after setup.
#[derive(Debug, Clone, Default)]
pub struct WallMesh {
    triangles: Vec<WallTriangle>,
}

impl WallMesh {
    /// Mesh without walls.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from an indexed vertex list. Normals, when given, must match
    /// the triangle count.
    pub fn from_indexed(
        vertices: &[DVec3],
        triangles: &[[u32; 3]],
        normals: Option<&[DVec3]>,
    ) -> Result<Self, GeometryError> {
        if let Some((i, _)) = vertices.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(GeometryError::NonFiniteVertex { index: i });
        }
        if let Some(n) = normals {
            if n.len() != triangles.len() {
                return Err(GeometryError::NormalCountMismatch {
                    normals: n.len(),
                    triangles: triangles.len(),
                });
            }
        }

        let mut out = Vec::with_capacity(triangles.len());
        for (t, idx) in triangles.iter().enumerate() {
            let mut corners = [DVec3::ZERO; 3];
            for (k, &vi) in idx.iter().enumerate() {
                corners[k] = *vertices.get(vi as usize).ok_or(GeometryError::IndexOutOfRange {
                    triangle: t,
                    vertex: vi,
                    count: vertices.len(),
                })?;
            }
            let tri = match normals {
                Some(n) => WallTriangle::with_normal(corners, n[t], t)?,
                None => WallTriangle::new(corners, t)?,
            };
            out.push(tri);
        }
        Ok(Self { triangles: out })
    }

    /// Build from triangle soup.
    pub fn from_triangles<I>(triangles: I) -> Result<Self, GeometryError>
    where
        I: IntoIterator<Item = [DVec3; 3]>,
    {
        let mut out = Vec::new();
        for (i, corners) in triangles.into_iter().enumerate() {
            if let Some(k) = corners.iter().position(|v| !v.is_finite()) {
                return Err(GeometryError::NonFiniteVertex { index: 3 * i + k });
            }
            out.push(WallTriangle::new(corners, i)?);
        }
        Ok(Self { triangles: out })
    }

    /// Append another mesh's triangles.
    pub fn extend(&mut self, other: WallMesh) {
        self.triangles.extend(other.triangles);
    }

    /// All triangles.
    pub fn triangles(&self) -> &[WallTriangle] {
        &self.triangles
    }

    /// Triangle by index.
    pub fn get(&self, index: usize) -> Option<&WallTriangle> {
        self.triangles.get(index)
    }

    /// Number of triangles.
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Bounding box of every triangle.
    pub fn bounds(&self) -> Aabb {
        self.triangles
            .iter()
            .fold(Aabb::empty(), |acc, t| acc.union(&t.aabb()))
    }

    /// Whether a sphere intersects any wall. Linear scan; intended for setup.
    pub fn sphere_touches(&self, center: DVec3, radius: f64) -> bool {
        let bb = Aabb::around_sphere(center, radius);
        self.triangles.iter().any(|t| {
            t.aabb().overlaps(&bb)
                && (t.closest_point(center).0 - center).length_squared() < radius * radius
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tri() -> WallTriangle {
        WallTriangle::new([DVec3::ZERO, DVec3::X, DVec3::Z], 0).unwrap()
    }

    #[test]
    fn normal_follows_winding() {
        let t = unit_tri();
        // (X - 0) x (Z - 0) = -Y
        assert!((t.normal - DVec3::NEG_Y).length() < 1e-12);
        assert!((t.area() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_triangle_is_rejected() {
        let err = WallTriangle::new([DVec3::ZERO, DVec3::X, 2.0 * DVec3::X], 7).unwrap_err();
        assert!(matches!(err, GeometryError::DegenerateTriangle { index: 7, .. }));
    }

    #[test]
    fn closest_point_regions() {
        let t = unit_tri();
        let (p, f) = t.closest_point(DVec3::new(0.2, 1.0, 0.2));
        assert_eq!(f, TriangleFeature::Face);
        assert!((p - DVec3::new(0.2, 0.0, 0.2)).length() < 1e-12);

        let (p, f) = t.closest_point(DVec3::new(-1.0, 0.0, -1.0));
        assert_eq!(f, TriangleFeature::Vertex(0));
        assert_eq!(p, DVec3::ZERO);

        let (p, f) = t.closest_point(DVec3::new(0.5, 0.3, -2.0));
        assert_eq!(f, TriangleFeature::Edge(0));
        assert!((p - DVec3::new(0.5, 0.0, 0.0)).length() < 1e-12);

        let (p, f) = t.closest_point(DVec3::new(1.0, 0.0, 1.0));
        assert_eq!(f, TriangleFeature::Edge(1));
        assert!((p - DVec3::new(0.5, 0.0, 0.5)).length() < 1e-12);
    }

    #[test]
    fn indexed_mesh_checks_indices() {
        let verts = [DVec3::ZERO, DVec3::X, DVec3::Z];
        let err = WallMesh::from_indexed(&verts, &[[0, 1, 3]], None).unwrap_err();
        assert!(matches!(err, GeometryError::IndexOutOfRange { vertex: 3, .. }));
        let mesh = WallMesh::from_indexed(&verts, &[[0, 1, 2]], Some(&[DVec3::Y])).unwrap();
        assert_eq!(mesh.len(), 1);
        assert_eq!(mesh.triangles()[0].normal, DVec3::Y);
    }

    #[test]
    fn sphere_touch_test() {
        let mesh = WallMesh::from_triangles([[DVec3::ZERO, DVec3::X, DVec3::Z]]).unwrap();
        assert!(mesh.sphere_touches(DVec3::new(0.2, 0.05, 0.2), 0.1));
        assert!(!mesh.sphere_touches(DVec3::new(0.2, 0.15, 0.2), 0.1));
    }
}

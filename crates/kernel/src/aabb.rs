//! Axis-aligned bounding boxes shared by the broad phase, the wall tree and
//! the particle factory.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box given by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl Aabb {
    /// Box spanning `min..max`.
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any `grow` call will replace.
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// Tight box around a sphere.
    #[inline]
    pub fn around_sphere(center: DVec3, radius: f64) -> Self {
        Self {
            min: center - DVec3::splat(radius),
            max: center + DVec3::splat(radius),
        }
    }

    /// Tight box around a set of points. Empty input yields [`Aabb::empty`].
    pub fn from_points(points: &[DVec3]) -> Self {
        points.iter().fold(Self::empty(), |mut b, &p| {
            b.grow(p);
            b
        })
    }

    /// Extend the box to contain `p`.
    #[inline]
    pub fn grow(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Smallest box containing both boxes.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box grown by `margin` on every side.
    pub fn inflated(&self, margin: f64) -> Aabb {
        Aabb {
            min: self.min - DVec3::splat(margin),
            max: self.max + DVec3::splat(margin),
        }
    }

    /// Closed-interval overlap test on all three axes.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether `p` lies inside or on the boundary.
    #[inline]
    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// True when `min <= max` on every axis and all coordinates are finite.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    /// Centre point.
    #[inline]
    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    /// Edge lengths.
    #[inline]
    pub fn extent(&self) -> DVec3 {
        self.max - self.min
    }

    /// Enclosed volume, zero for inverted boxes.
    pub fn volume(&self) -> f64 {
        let e = self.extent().max(DVec3::ZERO);
        e.x * e.y * e.z
    }

    /// Index (0, 1, 2) of the longest axis.
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            0
        } else if e.y >= e.z {
            1
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_boxes_overlap() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let b = Aabb::new(DVec3::new(1.0, 0.0, 0.0), DVec3::new(2.0, 1.0, 1.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn separated_boxes_do_not_overlap() {
        let a = Aabb::around_sphere(DVec3::ZERO, 0.5);
        let b = Aabb::around_sphere(DVec3::new(1.01, 0.0, 0.0), 0.5);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn from_points_and_longest_axis() {
        let b = Aabb::from_points(&[
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 3.0, 0.5),
            DVec3::new(-1.0, 1.0, 0.0),
        ]);
        assert_eq!(b.min, DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(b.max, DVec3::new(1.0, 3.0, 0.5));
        assert_eq!(b.longest_axis(), 1);
        assert!((b.volume() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_box_is_invalid_until_grown() {
        let mut b = Aabb::empty();
        assert!(!b.is_valid());
        b.grow(DVec3::ONE);
        assert!(b.is_valid());
        assert!(b.contains(DVec3::ONE));
    }
}

use crate::core::geo::{ProjectedPoint, ProjectedSize};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in projected coordinates.
///
/// `origin` is the south-west (minimum x, minimum y) corner; y grows northward.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectedRect {
    pub origin: ProjectedPoint,
    pub size: ProjectedSize,
}

impl ProjectedRect {
    pub fn new(origin: ProjectedPoint, size: ProjectedSize) -> Self {
        Self { origin, size }
    }

    /// Creates a rectangle from two opposite corners, in any order
    pub fn from_corners(a: ProjectedPoint, b: ProjectedPoint) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        Self::new(
            ProjectedPoint::new(min_x, min_y),
            ProjectedSize::new((a.x - b.x).abs(), (a.y - b.y).abs()),
        )
    }

    /// Creates a rectangle from individual coordinates
    pub fn from_coords(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::from_corners(
            ProjectedPoint::new(min_x, min_y),
            ProjectedPoint::new(max_x, max_y),
        )
    }

    /// Creates a rectangle from a center point and size
    pub fn from_center_and_size(center: ProjectedPoint, size: ProjectedSize) -> Self {
        Self::new(
            ProjectedPoint::new(center.x - size.width / 2.0, center.y - size.height / 2.0),
            size,
        )
    }

    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    pub fn width(&self) -> f64 {
        self.size.width
    }

    pub fn height(&self) -> f64 {
        self.size.height
    }

    /// Gets the center point of the rectangle
    pub fn center(&self) -> ProjectedPoint {
        ProjectedPoint::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    /// Returns the same-sized rectangle centred on `center`
    pub fn with_center(&self, center: ProjectedPoint) -> Self {
        Self::from_center_and_size(center, self.size)
    }

    /// Checks if the rectangle contains a point (edges inclusive)
    pub fn contains(&self, point: &ProjectedPoint) -> bool {
        point.x >= self.min_x()
            && point.x <= self.max_x()
            && point.y >= self.min_y()
            && point.y <= self.max_y()
    }

    /// Checks if `other` lies entirely inside this rectangle
    pub fn contains_rect(&self, other: &ProjectedRect) -> bool {
        other.min_x() >= self.min_x()
            && other.max_x() <= self.max_x()
            && other.min_y() >= self.min_y()
            && other.max_y() <= self.max_y()
    }

    /// Checks if the rectangles intersect (touching edges count)
    pub fn intersects(&self, other: &ProjectedRect) -> bool {
        !(other.max_x() < self.min_x()
            || other.min_x() > self.max_x()
            || other.max_y() < self.min_y()
            || other.min_y() > self.max_y())
    }

    /// Gets the intersection of two rectangles
    pub fn intersection(&self, other: &ProjectedRect) -> Option<ProjectedRect> {
        if !self.intersects(other) {
            return None;
        }

        Some(ProjectedRect::from_coords(
            self.min_x().max(other.min_x()),
            self.min_y().max(other.min_y()),
            self.max_x().min(other.max_x()),
            self.max_y().min(other.max_y()),
        ))
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &ProjectedRect) -> ProjectedRect {
        ProjectedRect::from_coords(
            self.min_x().min(other.min_x()),
            self.min_y().min(other.min_y()),
            self.max_x().max(other.max_x()),
            self.max_y().max(other.max_y()),
        )
    }

    /// Returns a rectangle grown by `amount` on every side
    pub fn expanded(&self, amount: f64) -> ProjectedRect {
        ProjectedRect::from_coords(
            self.min_x() - amount,
            self.min_y() - amount,
            self.max_x() + amount,
            self.max_y() + amount,
        )
    }

    /// Clamps a point to be within the rectangle
    pub fn clamp(&self, point: &ProjectedPoint) -> ProjectedPoint {
        ProjectedPoint::new(
            point.x.clamp(self.min_x(), self.max_x()),
            point.y.clamp(self.min_y(), self.max_y()),
        )
    }

    /// Finite origin and non-negative finite size
    pub fn is_valid(&self) -> bool {
        self.origin.is_finite()
            && self.size.width.is_finite()
            && self.size.height.is_finite()
            && self.size.width >= 0.0
            && self.size.height >= 0.0
    }

    /// Gets the area of the rectangle
    pub fn area(&self) -> f64 {
        if !self.is_valid() {
            0.0
        } else {
            self.size.width * self.size.height
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_creation() {
        let rect = ProjectedRect::from_coords(10.0, 20.0, 30.0, 40.0);
        assert_eq!(rect.width(), 20.0);
        assert_eq!(rect.height(), 20.0);
        assert_eq!(rect.center(), ProjectedPoint::new(20.0, 30.0));
    }

    #[test]
    fn test_from_corners_orders_points() {
        let rect =
            ProjectedRect::from_corners(ProjectedPoint::new(5.0, 1.0), ProjectedPoint::new(-5.0, 3.0));
        assert_eq!(rect.origin, ProjectedPoint::new(-5.0, 1.0));
        assert_eq!(rect.size, ProjectedSize::new(10.0, 2.0));
    }

    #[test]
    fn test_rect_contains() {
        let rect = ProjectedRect::from_coords(10.0, 20.0, 30.0, 40.0);
        assert!(rect.contains(&ProjectedPoint::new(15.0, 25.0)));
        assert!(rect.contains(&ProjectedPoint::new(30.0, 40.0)));
        assert!(!rect.contains(&ProjectedPoint::new(5.0, 25.0)));
    }

    #[test]
    fn test_rect_intersection() {
        let a = ProjectedRect::from_coords(0.0, 0.0, 10.0, 10.0);
        let b = ProjectedRect::from_coords(5.0, 5.0, 15.0, 15.0);

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection.origin, ProjectedPoint::new(5.0, 5.0));
        assert_eq!(intersection.max_x(), 10.0);
        assert_eq!(intersection.max_y(), 10.0);
    }

    #[test]
    fn test_rect_no_intersection() {
        let a = ProjectedRect::from_coords(0.0, 0.0, 5.0, 5.0);
        let b = ProjectedRect::from_coords(10.0, 10.0, 15.0, 15.0);

        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_invalid_rect() {
        let rect = ProjectedRect::new(
            ProjectedPoint::new(f64::NAN, 0.0),
            ProjectedSize::new(1.0, 1.0),
        );
        assert!(!rect.is_valid());
        assert_eq!(rect.area(), 0.0);
    }
}

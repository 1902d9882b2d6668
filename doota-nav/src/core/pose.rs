//! Pose and point types.

use serde::{Deserialize, Serialize};

/// A 2D point in meters, global frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f32,
    pub y: f32,
}

impl Point2D {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn distance(&self, other: &Point2D) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Robot pose: position in meters and heading in radians.
///
/// The heading is normalized to (-π, π] by construction. The global frame
/// has its origin at the robot's home position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f32,
    pub y: f32,
    pub theta: f32,
}

impl Pose2D {
    #[inline]
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: super::math::normalize_angle(theta),
        }
    }

    /// Origin pose with zero heading.
    #[inline]
    pub fn home() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Euclidean distance to a point.
    #[inline]
    pub fn distance_to(&self, point: &Point2D) -> f32 {
        self.position().distance(point)
    }

    /// Bearing from this pose to a point, global frame.
    #[inline]
    pub fn bearing_to(&self, point: &Point2D) -> f32 {
        (point.y - self.y).atan2(point.x - self.x)
    }

    /// Transform a robot-frame point into the global frame.
    #[inline]
    pub fn transform(&self, local_x: f32, local_y: f32) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2D::new(
            self.x + local_x * cos_t - local_y * sin_t,
            self.y + local_x * sin_t + local_y * cos_t,
        )
    }
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::home()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_theta_normalized_on_construction() {
        let pose = Pose2D::new(0.0, 0.0, 3.0 * PI);
        assert_relative_eq!(pose.theta, PI, epsilon = 1e-6);
    }

    #[test]
    fn test_bearing() {
        let pose = Pose2D::home();
        assert_relative_eq!(pose.bearing_to(&Point2D::new(1.0, 0.0)), 0.0);
        assert_relative_eq!(pose.bearing_to(&Point2D::new(0.0, 1.0)), FRAC_PI_2);
    }

    #[test]
    fn test_transform_rotates_local_frame() {
        // Robot at (1, 1) facing +y: robot-forward maps to global +y.
        let pose = Pose2D::new(1.0, 1.0, FRAC_PI_2);
        let ahead = pose.transform(2.0, 0.0);
        assert_relative_eq!(ahead.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(ahead.y, 3.0, epsilon = 1e-6);
    }
}

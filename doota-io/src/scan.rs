//! Laser scan types.

use serde::{Deserialize, Serialize};

/// One lidar return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Range to the surface in meters.
    pub distance: f32,
    /// Beam angle in radians, robot frame, [0, 2π).
    pub angle: f32,
    /// Reflection intensity, 0-255.
    pub intensity: u8,
}

impl ScanPoint {
    pub fn new(distance: f32, angle: f32, intensity: u8) -> Self {
        Self {
            distance,
            angle,
            intensity,
        }
    }

    /// Cartesian position of the return in the robot frame.
    #[inline]
    pub fn to_cartesian(&self) -> (f32, f32) {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (self.distance * cos_a, self.distance * sin_a)
    }
}

/// One full revolution of the scanner.
///
/// Points are ordered by angle over [0, 2π).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaserScan {
    points: Vec<ScanPoint>,
}

impl LaserScan {
    /// Build a scan from points, sorting them by angle.
    pub fn from_points(mut points: Vec<ScanPoint>) -> Self {
        points.sort_by(|a, b| a.angle.total_cmp(&b.angle));
        Self { points }
    }

    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Every `step`-th point, used for sparse measurement models.
    pub fn sample(&self, count: usize) -> impl Iterator<Item = &ScanPoint> {
        let step = if count == 0 {
            1
        } else {
            (self.points.len() / count).max(1)
        };
        self.points.iter().step_by(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_points_sorted_by_angle() {
        let scan = LaserScan::from_points(vec![
            ScanPoint::new(1.0, PI, 100),
            ScanPoint::new(2.0, 0.0, 100),
            ScanPoint::new(3.0, FRAC_PI_2, 100),
        ]);

        let angles: Vec<f32> = scan.points().iter().map(|p| p.angle).collect();
        assert_eq!(angles, vec![0.0, FRAC_PI_2, PI]);
    }

    #[test]
    fn test_to_cartesian() {
        let ahead = ScanPoint::new(2.0, 0.0, 50);
        let (x, y) = ahead.to_cartesian();
        assert_relative_eq!(x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);

        let left = ScanPoint::new(1.0, FRAC_PI_2, 50);
        let (x, y) = left.to_cartesian();
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sample_spacing() {
        let points: Vec<ScanPoint> = (0..360)
            .map(|i| ScanPoint::new(1.0, (i as f32).to_radians(), 0))
            .collect();
        let scan = LaserScan::from_points(points);

        let sampled: Vec<_> = scan.sample(12).collect();
        assert_eq!(sampled.len(), 12);
    }
}

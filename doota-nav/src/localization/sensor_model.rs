//! Range measurement model.
//!
//! For a hypothesized pose, a sparse subset of beams is compared against
//! expected ranges obtained by ray-casting the map. Each beam contributes a
//! Gaussian in the range residual plus a uniform outlier floor; the beam
//! likelihoods multiply.

use crate::core::math::normalize_angle;
use crate::core::Pose2D;
use crate::map::OccupancyMap;
use doota_io::LaserScan;
use serde::Deserialize;

/// Measurement model parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SensorModelConfig {
    /// Gaussian sigma of the range residual (m).
    pub sigma: f32,
    /// Uniform outlier floor added to every beam likelihood.
    pub outlier_floor: f64,
    /// Beams sampled per scan, evenly spaced.
    pub beams: usize,
    /// Ray-cast cap (m).
    pub max_range: f32,
}

impl Default for SensorModelConfig {
    fn default() -> Self {
        Self {
            sigma: 0.2,
            outlier_floor: 0.05,
            beams: 12,
            max_range: 10.0,
        }
    }
}

/// Computes scan likelihood for particle weighting.
#[derive(Debug, Clone)]
pub struct SensorModel {
    config: SensorModelConfig,
}

impl SensorModel {
    pub fn new(config: SensorModelConfig) -> Self {
        Self { config }
    }

    /// Likelihood of observing `scan` from `pose` on `map`.
    ///
    /// Clamped away from zero so a single bad beam cannot annihilate a
    /// particle.
    pub fn likelihood(&self, scan: &LaserScan, pose: &Pose2D, map: &OccupancyMap) -> f64 {
        let mut likelihood = 1.0f64;
        let inv_two_sigma_sq = 1.0 / (2.0 * self.config.sigma * self.config.sigma) as f64;

        for point in scan.sample(self.config.beams) {
            let beam_angle = normalize_angle(pose.theta + point.angle);
            let expected = map.ray_cast(pose.x, pose.y, beam_angle, self.config.max_range);
            let residual = (point.distance - expected) as f64;

            let gaussian = (-residual * residual * inv_two_sigma_sq).exp();
            likelihood *= gaussian + self.config.outlier_floor;
        }

        likelihood.max(1e-300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Point2D;
    use crate::map::{CellState, OccupancyMap};
    use doota_io::ScanPoint;

    /// 10x10m map with a wall along x = 5.
    fn walled_map() -> OccupancyMap {
        let mut map = OccupancyMap::new_free(10.0, 10.0, 0.1, Point2D::new(0.0, 0.0));
        for cy in 0..100 {
            map.set_cell(50, cy, CellState::Occupied);
        }
        map
    }

    /// A scan consistent with standing at `x` facing the wall.
    fn scan_from(x: f32) -> LaserScan {
        LaserScan::from_points(vec![
            ScanPoint::new(5.0 - x, 0.0, 200),
            ScanPoint::new(5.0 - x, 0.01, 200),
            ScanPoint::new(5.0 - x, 0.02, 200),
        ])
    }

    #[test]
    fn test_true_pose_scores_higher() {
        let map = walled_map();
        let model = SensorModel::new(SensorModelConfig::default());
        let scan = scan_from(2.0);

        let at_truth = model.likelihood(&scan, &Pose2D::new(2.0, 5.0, 0.0), &map);
        let displaced = model.likelihood(&scan, &Pose2D::new(3.5, 5.0, 0.0), &map);

        assert!(
            at_truth > displaced,
            "truth {} should beat displaced {}",
            at_truth,
            displaced
        );
    }

    #[test]
    fn test_likelihood_positive_and_finite() {
        let map = walled_map();
        let model = SensorModel::new(SensorModelConfig::default());
        let scan = scan_from(2.0);

        // Even a hopeless pose keeps a nonzero likelihood via the floor.
        let hopeless = model.likelihood(&scan, &Pose2D::new(9.0, 9.0, 3.0), &map);
        assert!(hopeless > 0.0);
        assert!(hopeless.is_finite());
    }
}

//! Probabilistic localization
//!
//! [`Localizer`] wraps the particle filter with divergence supervision:
//! when the weighted positional variance stays above a threshold for
//! longer than a configured window, one relocalization attempt re-seeds
//! the cloud around the last estimate with widened spread; if the filter
//! still does not converge the failure is surfaced.

mod motion_model;
mod particle_filter;
mod sensor_model;

pub use motion_model::{MotionModel, MotionNoise};
pub use particle_filter::{Particle, ParticleFilter, ParticleFilterConfig};
pub use sensor_model::{SensorModel, SensorModelConfig};

use crate::core::Pose2D;
use crate::error::NavError;
use crate::map::OccupancyMap;
use doota_io::LaserScan;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Divergence supervision parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalizerConfig {
    /// Positional standard deviation above which the belief counts as
    /// diverged (m).
    pub divergence_std_dev: f32,
    /// How long the belief may stay diverged before failing (s).
    pub divergence_window_secs: f32,
    /// Spread used when re-seeding after a divergence (m / rad).
    pub relocalize_spread_xy: f32,
    pub relocalize_spread_theta: f32,
    /// Relocalization attempts before the failure is surfaced.
    pub relocalize_attempts: u32,
    pub filter: ParticleFilterConfig,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            divergence_std_dev: 1.0,
            divergence_window_secs: 3.0,
            relocalize_spread_xy: 0.5,
            relocalize_spread_theta: std::f32::consts::PI,
            relocalize_attempts: 1,
            filter: ParticleFilterConfig::default(),
        }
    }
}

/// Particle filter plus divergence supervision.
pub struct Localizer {
    config: LocalizerConfig,
    filter: ParticleFilter,
    diverged_since: Option<Instant>,
    attempts_used: u32,
}

impl Localizer {
    pub fn new(config: LocalizerConfig, start: Pose2D) -> Self {
        let filter = ParticleFilter::new(config.filter.clone(), start);
        Self {
            config,
            filter,
            diverged_since: None,
            attempts_used: 0,
        }
    }

    /// Latest pose estimate.
    pub fn estimate(&self) -> Pose2D {
        self.filter.estimate()
    }

    /// Apply an odometry delta (motion update).
    pub fn predict(&mut self, ds: f32, dtheta: f32) {
        self.filter.predict(ds, dtheta);
    }

    /// Apply a scan (measurement update) and run divergence supervision.
    pub fn update(&mut self, scan: &LaserScan, map: &OccupancyMap) -> Result<(), NavError> {
        self.filter.update(scan, map);
        self.supervise()
    }

    /// Effective sample size of the underlying filter.
    pub fn neff(&self) -> f64 {
        self.filter.neff()
    }

    fn supervise(&mut self) -> Result<(), NavError> {
        let variance = self.filter.positional_variance();
        let std_dev = variance.sqrt();

        if std_dev <= self.config.divergence_std_dev {
            if self.diverged_since.take().is_some() {
                log::info!("localization converged again (std dev {:.2}m)", std_dev);
            }
            self.attempts_used = 0;
            return Ok(());
        }

        let since = *self.diverged_since.get_or_insert_with(Instant::now);
        let window = Duration::from_secs_f32(self.config.divergence_window_secs);
        if since.elapsed() < window {
            return Ok(());
        }

        if self.attempts_used < self.config.relocalize_attempts {
            self.attempts_used += 1;
            log::warn!(
                "localization diverged (std dev {:.2}m), relocalizing (attempt {}/{})",
                std_dev,
                self.attempts_used,
                self.config.relocalize_attempts
            );
            let anchor = self.filter.estimate();
            self.filter.reseed(
                anchor,
                self.config.relocalize_spread_xy,
                self.config.relocalize_spread_theta,
            );
            self.diverged_since = Some(Instant::now());
            return Ok(());
        }

        Err(NavError::LocalizationFailure { std_dev })
    }
}

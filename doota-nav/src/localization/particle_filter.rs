//! Monte Carlo localization.
//!
//! A fixed-size particle multiset tracks the belief over the robot's global
//! pose. Motion updates advance every particle through the noisy motion
//! model; measurement updates multiply weights by scan likelihoods and
//! renormalize; low-variance resampling fires when the effective sample
//! size drops below half the particle count.

use super::motion_model::{MotionModel, MotionNoise};
use super::sensor_model::{SensorModel, SensorModelConfig};
use crate::core::math::angle_diff;
use crate::core::Pose2D;
use crate::map::OccupancyMap;
use doota_io::LaserScan;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;

/// One pose hypothesis.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub pose: Pose2D,
    pub weight: f64,
}

/// Filter parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticleFilterConfig {
    /// Particle count, fixed for the life of the filter.
    pub num_particles: usize,
    /// Resample when neff / num_particles falls below this ratio.
    pub resample_ratio: f64,
    /// Initial position spread around the start pose (m, 1 sigma).
    pub initial_spread_xy: f32,
    /// Initial heading spread (rad, 1 sigma).
    pub initial_spread_theta: f32,
    /// RNG seed; 0 draws one from the OS.
    pub seed: u64,
    pub motion: MotionNoise,
    pub sensor: SensorModelConfig,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 100,
            resample_ratio: 0.5,
            initial_spread_xy: 0.1,
            initial_spread_theta: 0.1,
            seed: 0,
            motion: MotionNoise::default(),
            sensor: SensorModelConfig::default(),
        }
    }
}

/// Particle filter over the robot's global pose.
pub struct ParticleFilter {
    config: ParticleFilterConfig,
    particles: Vec<Particle>,
    motion: MotionModel,
    sensor: SensorModel,
    rng: SmallRng,
    neff: f64,
}

impl ParticleFilter {
    /// Create a filter seeded with Gaussian noise around `start`.
    pub fn new(config: ParticleFilterConfig, start: Pose2D) -> Self {
        let mut rng = if config.seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(config.seed)
        };

        let particles = seed_particles(
            &mut rng,
            config.num_particles,
            &start,
            config.initial_spread_xy,
            config.initial_spread_theta,
        );

        Self {
            motion: MotionModel::new(config.motion),
            sensor: SensorModel::new(config.sensor),
            particles,
            rng,
            neff: config.num_particles as f64,
            config,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Effective sample size after the last measurement update.
    pub fn neff(&self) -> f64 {
        self.neff
    }

    /// Motion update: advance every particle by (ds, dtheta) with noise.
    pub fn predict(&mut self, ds: f32, dtheta: f32) {
        for particle in &mut self.particles {
            particle.pose = self.motion.sample(&mut self.rng, &particle.pose, ds, dtheta);
        }
    }

    /// Measurement update: reweight by scan likelihood, renormalize, and
    /// resample if the effective sample size has collapsed.
    pub fn update(&mut self, scan: &LaserScan, map: &OccupancyMap) {
        if scan.is_empty() {
            return;
        }

        for particle in &mut self.particles {
            let likelihood = self.sensor.likelihood(scan, &particle.pose, map);
            particle.weight *= likelihood;
        }

        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if total > 0.0 && total.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= total;
            }
        } else {
            log::warn!("all particle weights vanished, resetting to uniform");
            let uniform = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
        }

        let sum_sq: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        self.neff = if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 };

        let threshold = self.config.resample_ratio * self.particles.len() as f64;
        if self.neff < threshold {
            self.resample();
        }
    }

    /// Low-variance resampling; weights return to uniform.
    fn resample(&mut self) {
        let n = self.particles.len();
        let step = 1.0 / n as f64;
        let start: f64 = self.rng.gen::<f64>() * step;

        let mut new_particles = Vec::with_capacity(n);
        let mut cumulative = self.particles[0].weight;
        let mut index = 0;

        for i in 0..n {
            let target = start + i as f64 * step;
            while target > cumulative && index < n - 1 {
                index += 1;
                cumulative += self.particles[index].weight;
            }
            new_particles.push(Particle {
                pose: self.particles[index].pose,
                weight: step,
            });
        }

        self.particles = new_particles;
        log::debug!("resampled {} particles", n);
    }

    /// Weighted pose estimate: arithmetic mean for position, circular mean
    /// for heading.
    pub fn estimate(&self) -> Pose2D {
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut sum_sin = 0.0f64;
        let mut sum_cos = 0.0f64;
        let mut total = 0.0f64;

        for p in &self.particles {
            sum_x += p.weight * p.pose.x as f64;
            sum_y += p.weight * p.pose.y as f64;
            sum_sin += p.weight * (p.pose.theta as f64).sin();
            sum_cos += p.weight * (p.pose.theta as f64).cos();
            total += p.weight;
        }

        if total <= 0.0 {
            return Pose2D::home();
        }

        Pose2D::new(
            (sum_x / total) as f32,
            (sum_y / total) as f32,
            (sum_sin.atan2(sum_cos)) as f32,
        )
    }

    /// Weighted positional variance around the estimate (m²).
    pub fn positional_variance(&self) -> f32 {
        let mean = self.estimate();
        let mut var = 0.0f64;
        let mut total = 0.0f64;

        for p in &self.particles {
            let dx = (p.pose.x - mean.x) as f64;
            let dy = (p.pose.y - mean.y) as f64;
            var += p.weight * (dx * dx + dy * dy);
            total += p.weight;
        }

        if total > 0.0 {
            (var / total) as f32
        } else {
            f32::INFINITY
        }
    }

    /// Re-seed the particle cloud around `pose` with the given spreads.
    ///
    /// Used by relocalization after a divergence.
    pub fn reseed(&mut self, pose: Pose2D, spread_xy: f32, spread_theta: f32) {
        self.particles = seed_particles(
            &mut self.rng,
            self.config.num_particles,
            &pose,
            spread_xy,
            spread_theta,
        );
        self.neff = self.config.num_particles as f64;
    }

    /// Weighted mean heading error against a reference, for diagnostics.
    pub fn heading_spread(&self, reference: f32) -> f32 {
        let mut spread = 0.0f64;
        for p in &self.particles {
            let d = angle_diff(reference, p.pose.theta) as f64;
            spread += p.weight * d * d;
        }
        spread.sqrt() as f32
    }
}

fn seed_particles(
    rng: &mut SmallRng,
    count: usize,
    center: &Pose2D,
    spread_xy: f32,
    spread_theta: f32,
) -> Vec<Particle> {
    let weight = 1.0 / count as f64;
    (0..count)
        .map(|_| {
            let nx: f32 = rng.sample(StandardNormal);
            let ny: f32 = rng.sample(StandardNormal);
            let nt: f32 = rng.sample(StandardNormal);
            Particle {
                pose: Pose2D::new(
                    center.x + nx * spread_xy,
                    center.y + ny * spread_xy,
                    center.theta + nt * spread_theta,
                ),
                weight,
            }
        })
        .collect()
}

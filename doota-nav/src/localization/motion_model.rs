//! Odometry motion model for the particle filter.
//!
//! Each particle is advanced by the same differential-drive kinematics as
//! the odometry integrator, with zero-mean Gaussian noise added
//! independently on the linear displacement, the heading change, and a
//! lateral cross-term. Noise magnitudes scale with the motion so a
//! stationary robot does not diffuse.

use crate::core::math::normalize_angle;
use crate::core::Pose2D;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;

/// Noise scales for the motion model.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MotionNoise {
    /// Linear noise per meter travelled (m/m).
    pub trans_per_m: f32,
    /// Heading noise per radian turned (rad/rad).
    pub rot_per_rad: f32,
    /// Heading noise per meter travelled (rad/m).
    pub rot_per_m: f32,
    /// Lateral slip per meter travelled (m/m).
    pub lateral_per_m: f32,
}

impl Default for MotionNoise {
    fn default() -> Self {
        Self {
            trans_per_m: 0.10,
            rot_per_rad: 0.15,
            rot_per_m: 0.05,
            lateral_per_m: 0.05,
        }
    }
}

/// Samples noisy particle motion.
#[derive(Debug, Clone)]
pub struct MotionModel {
    noise: MotionNoise,
}

impl MotionModel {
    pub fn new(noise: MotionNoise) -> Self {
        Self { noise }
    }

    /// Advance a particle by (ds, dtheta) with sampled noise.
    pub fn sample(&self, rng: &mut SmallRng, pose: &Pose2D, ds: f32, dtheta: f32) -> Pose2D {
        if ds.abs() < 1e-9 && dtheta.abs() < 1e-9 {
            return *pose;
        }

        let sigma_trans = self.noise.trans_per_m * ds.abs();
        let sigma_rot =
            self.noise.rot_per_rad * dtheta.abs() + self.noise.rot_per_m * ds.abs();
        let sigma_lateral = self.noise.lateral_per_m * ds.abs();

        let noisy_ds = ds + gaussian(rng, sigma_trans);
        let noisy_dtheta = dtheta + gaussian(rng, sigma_rot);
        let lateral = gaussian(rng, sigma_lateral);

        let heading = pose.theta + noisy_dtheta / 2.0;
        let (sin_h, cos_h) = heading.sin_cos();
        Pose2D::new(
            pose.x + noisy_ds * cos_h - lateral * sin_h,
            pose.y + noisy_ds * sin_h + lateral * cos_h,
            normalize_angle(pose.theta + noisy_dtheta),
        )
    }
}

fn gaussian(rng: &mut SmallRng, sigma: f32) -> f32 {
    if sigma < 1e-12 {
        return 0.0;
    }
    let sample: f32 = rng.sample(StandardNormal);
    sample * sigma
}

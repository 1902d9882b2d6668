//! Lock-free state shared between the localization thread, the motion
//! worker and the caller.

use crate::core::Pose2D;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Atomic f32 via bit reinterpretation.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, value: f32, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }
}

/// Atomic pose in fixed point: x and y packed as millimetres into one u64,
/// heading in 0.1 mrad in a u32. Readers never see a torn x/y pair.
#[derive(Debug)]
pub struct AtomicPose {
    xy: AtomicU64,
    theta: AtomicU32,
}

impl AtomicPose {
    pub fn new(pose: Pose2D) -> Self {
        let (xy, theta) = Self::pack(pose);
        Self {
            xy: AtomicU64::new(xy),
            theta: AtomicU32::new(theta),
        }
    }

    fn pack(pose: Pose2D) -> (u64, u32) {
        let x_mm = (pose.x * 1000.0) as i32;
        let y_mm = (pose.y * 1000.0) as i32;
        let xy = ((x_mm as u32 as u64) << 32) | (y_mm as u32 as u64);
        let theta = (pose.theta * 10_000.0) as i32 as u32;
        (xy, theta)
    }

    pub fn load(&self, order: Ordering) -> Pose2D {
        let xy = self.xy.load(order);
        let x_mm = (xy >> 32) as u32 as i32;
        let y_mm = xy as u32 as i32;
        let theta = self.theta.load(order) as i32;
        Pose2D::new(
            x_mm as f32 / 1000.0,
            y_mm as f32 / 1000.0,
            theta as f32 / 10_000.0,
        )
    }

    pub fn store(&self, pose: Pose2D, order: Ordering) {
        let (xy, theta) = Self::pack(pose);
        self.xy.store(xy, order);
        self.theta.store(theta, order);
    }
}

/// State shared across navigation threads.
#[derive(Debug)]
pub struct NavShared {
    /// Latest localizer estimate.
    pub pose: AtomicPose,
    /// Latest IR proximity reading converted to meters; NaN while unknown.
    pub ir_distance: AtomicF32,
    /// Set by `stop()`; observed by the motion worker every iteration.
    pub cancel: AtomicBool,
    /// A navigation goal is currently active.
    pub navigating: AtomicBool,
    /// The localizer has diverged beyond recovery.
    pub localization_failed: AtomicBool,
    /// Positional std dev recorded when the divergence was declared.
    pub localization_std_dev: AtomicF32,
    /// Tear down all workers.
    pub shutdown: AtomicBool,
}

impl NavShared {
    pub fn new(start: Pose2D) -> Self {
        Self {
            pose: AtomicPose::new(start),
            ir_distance: AtomicF32::new(f32::NAN),
            cancel: AtomicBool::new(false),
            navigating: AtomicBool::new(false),
            localization_failed: AtomicBool::new(false),
            localization_std_dev: AtomicF32::new(f32::NAN),
            shutdown: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_atomic_pose_round_trip() {
        let slot = AtomicPose::new(Pose2D::home());
        let pose = Pose2D::new(-3.217, 4.501, -1.2345);
        slot.store(pose, Ordering::Release);

        let loaded = slot.load(Ordering::Acquire);
        assert_relative_eq!(loaded.x, pose.x, epsilon = 1e-3);
        assert_relative_eq!(loaded.y, pose.y, epsilon = 1e-3);
        assert_relative_eq!(loaded.theta, pose.theta, epsilon = 1e-3);
    }

    #[test]
    fn test_atomic_f32_round_trip() {
        let slot = AtomicF32::new(f32::NAN);
        assert!(slot.load(Ordering::Acquire).is_nan());
        slot.store(0.085, Ordering::Release);
        assert_relative_eq!(slot.load(Ordering::Acquire), 0.085);
    }
}

//! Wheel odometry
//!
//! [`TickTracker`] turns cumulative encoder counts into per-update deltas,
//! handling 32-bit wraparound. [`OdometryIntegrator`] applies deltas
//! through differential-drive kinematics to hold the dead-reckoned pose.

use crate::core::math::normalize_angle;
use crate::core::Pose2D;
use std::f32::consts::TAU;
use std::time::Instant;

/// Wheel geometry and health thresholds.
#[derive(Debug, Clone)]
pub struct OdometryConfig {
    /// Distance between wheel centers (m).
    pub wheel_base: f32,
    /// Wheel radius (m).
    pub wheel_radius: f32,
    /// Encoder ticks per wheel revolution.
    pub ticks_per_rev: f32,
    /// Tick deltas above this magnitude are discarded as glitches.
    pub max_delta_ticks: i32,
    /// Consecutive all-zero deltas before the encoders are flagged stale.
    pub stale_update_threshold: u32,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            wheel_base: 0.30,
            wheel_radius: 0.05,
            ticks_per_rev: 1000.0,
            max_delta_ticks: 1000,
            stale_update_threshold: 50,
        }
    }
}

/// One encoder update expressed as tick deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDelta {
    pub left: i32,
    pub right: i32,
    /// Time since the previous update (s).
    pub dt: f32,
}

/// Converts cumulative signed tick counts into deltas.
///
/// The first update only seeds state. Wraparound of the 32-bit counters is
/// absorbed by wrapping subtraction.
#[derive(Debug, Default)]
pub struct TickTracker {
    last: Option<(i32, i32, Instant)>,
}

impl TickTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a cumulative reading; returns the delta from the previous one.
    pub fn update(&mut self, left: i32, right: i32, at: Instant) -> Option<TickDelta> {
        let delta = self.last.map(|(prev_left, prev_right, prev_at)| TickDelta {
            left: left.wrapping_sub(prev_left),
            right: right.wrapping_sub(prev_right),
            dt: at.duration_since(prev_at).as_secs_f32(),
        });
        self.last = Some((left, right, at));
        delta
    }
}

/// The robot-frame displacement produced by one encoder update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OdomDelta {
    /// Linear displacement along the heading (m).
    pub ds: f32,
    /// Heading change (rad).
    pub dtheta: f32,
    /// Interval the displacement was measured over (s).
    pub dt: f32,
}

/// Dead-reckoned pose from differential-drive kinematics.
#[derive(Debug)]
pub struct OdometryIntegrator {
    config: OdometryConfig,
    pose: Pose2D,
    zero_streak: u32,
    stale_reported: bool,
}

impl OdometryIntegrator {
    pub fn new(config: OdometryConfig, start: Pose2D) -> Self {
        Self {
            config,
            pose: start,
            zero_streak: 0,
            stale_reported: false,
        }
    }

    /// Current dead-reckoned pose.
    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    /// Replace the pose; tick memory is unaffected so the next delta
    /// integrates from the new anchor.
    pub fn reset(&mut self, x: f32, y: f32, theta: f32) {
        self.pose = Pose2D::new(x, y, theta);
    }

    /// Integrate one tick delta, returning the robot-frame displacement.
    ///
    /// A glitched delta (beyond `max_delta_ticks` on either wheel) is
    /// dropped and reported as zero displacement.
    pub fn apply(&mut self, delta: &TickDelta) -> OdomDelta {
        if delta.left.abs() > self.config.max_delta_ticks
            || delta.right.abs() > self.config.max_delta_ticks
        {
            log::warn!(
                "discarding anomalous encoder delta: left={} right={}",
                delta.left,
                delta.right
            );
            return OdomDelta {
                dt: delta.dt,
                ..Default::default()
            };
        }

        self.track_health(delta);

        let metres_per_tick = TAU * self.config.wheel_radius / self.config.ticks_per_rev;
        let dl = delta.left as f32 * metres_per_tick;
        let dr = delta.right as f32 * metres_per_tick;

        let ds = (dl + dr) / 2.0;
        let dtheta = (dr - dl) / self.config.wheel_base;

        // Midpoint-heading integration
        let heading = self.pose.theta + dtheta / 2.0;
        self.pose = Pose2D::new(
            self.pose.x + ds * heading.cos(),
            self.pose.y + ds * heading.sin(),
            normalize_angle(self.pose.theta + dtheta),
        );

        OdomDelta {
            ds,
            dtheta,
            dt: delta.dt,
        }
    }

    /// True while the encoders look alive (recent non-zero deltas).
    pub fn encoders_healthy(&self) -> bool {
        self.zero_streak < self.config.stale_update_threshold * 2
    }

    fn track_health(&mut self, delta: &TickDelta) {
        if delta.left == 0 && delta.right == 0 {
            self.zero_streak += 1;
            if self.zero_streak == self.config.stale_update_threshold {
                log::warn!(
                    "encoders reported zero movement for {} consecutive updates",
                    self.zero_streak
                );
                self.stale_reported = true;
            }
        } else {
            if self.stale_reported {
                log::debug!("encoder updates resumed");
                self.stale_reported = false;
            }
            self.zero_streak = 0;
        }
    }
}

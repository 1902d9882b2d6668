//! Differential-drive waypoint steering.
//!
//! Two PID loops run per control tick: the angular loop on the heading
//! error toward the current waypoint, mapped to a wheel speed differential,
//! and the linear loop on the remaining distance, scaled down smoothly as
//! the heading error grows so large errors turn the robot in place.

use super::pid::{Pid, PidGains};
use crate::core::math::normalize_angle;
use crate::core::Pose2D;
use crate::planning::Waypoint;
use serde::Deserialize;
use std::f32::consts::PI;

/// One motor actuation, in wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub left_speed: u8,
    pub right_speed: u8,
    pub left_forward: bool,
    pub right_forward: bool,
}

impl MotorCommand {
    pub fn stop() -> Self {
        Self {
            left_speed: 0,
            right_speed: 0,
            left_forward: true,
            right_forward: true,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.left_speed == 0 && self.right_speed == 0
    }

    /// The wire command equivalent.
    pub fn to_wire(self) -> doota_io::Command {
        doota_io::Command::Motor {
            left_speed: self.left_speed,
            right_speed: self.right_speed,
            left_forward: self.left_forward,
            right_forward: self.right_forward,
        }
    }
}

/// Steering parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    /// Speed ceiling in wire units (0-255).
    pub max_speed: f32,
    /// Speed floor while driving, so friction never stalls the robot.
    pub min_speed: f32,
    /// Heading error beyond which linear speed tapers off (rad).
    pub turn_threshold: f32,
    pub linear: PidGains,
    pub angular: PidGains,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_speed: 200.0,
            min_speed: 60.0,
            turn_threshold: 0.5,
            linear: PidGains::new(1.0, 0.0, 0.1),
            angular: PidGains::new(1.2, 0.0, 0.15),
        }
    }
}

/// Maps pose/waypoint error to wheel commands through the PID pair.
#[derive(Debug, Clone)]
pub struct DriveController {
    config: DriveConfig,
    linear: Pid,
    angular: Pid,
}

impl DriveController {
    pub fn new(config: DriveConfig) -> Self {
        Self {
            linear: Pid::new(config.linear),
            angular: Pid::new(config.angular),
            config,
        }
    }

    /// Compute the next wheel command toward `waypoint`.
    pub fn steer(&mut self, pose: &Pose2D, waypoint: &Waypoint, dt: f32) -> MotorCommand {
        let target = waypoint.position();
        let distance = pose.distance_to(&target);
        let heading_error = normalize_angle(pose.bearing_to(&target) - pose.theta);

        let linear_control = self.linear.update(distance, dt);
        let angular_control = self.angular.update(heading_error, dt);

        // Linear speed tapers from full at the turn threshold to zero at a
        // straight-behind target, turning the robot in place first.
        let mut linear_speed = (linear_control * self.config.max_speed)
            .clamp(self.config.min_speed, self.config.max_speed);
        if heading_error.abs() > self.config.turn_threshold {
            let taper = (PI - heading_error.abs()) / (PI - self.config.turn_threshold);
            linear_speed *= taper.clamp(0.0, 1.0);
        }

        let differential = angular_control * self.config.max_speed * 0.5;
        let left = (linear_speed - differential).clamp(-self.config.max_speed, self.config.max_speed);
        let right = (linear_speed + differential).clamp(-self.config.max_speed, self.config.max_speed);

        MotorCommand {
            left_speed: left.abs().round() as u8,
            right_speed: right.abs().round() as u8,
            left_forward: left >= 0.0,
            right_forward: right >= 0.0,
        }
    }

    /// Clear PID state before a new waypoint list.
    pub fn reset(&mut self) {
        self.linear.reset();
        self.angular.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn controller() -> DriveController {
        DriveController::new(DriveConfig::default())
    }

    #[test]
    fn test_straight_ahead_drives_symmetric() {
        let mut drive = controller();
        let cmd = drive.steer(&Pose2D::home(), &Waypoint::new(2.0, 0.0), 0.1);

        assert!(cmd.left_forward && cmd.right_forward);
        assert!(cmd.left_speed > 0 && cmd.right_speed > 0);
        let diff = cmd.left_speed as i32 - cmd.right_speed as i32;
        assert!(diff.abs() <= 2, "nearly symmetric, diff = {}", diff);
    }

    #[test]
    fn test_target_left_turns_left() {
        let mut drive = controller();
        // Target 90° to the left: right wheel must outrun the left.
        let cmd = drive.steer(&Pose2D::home(), &Waypoint::new(0.0, 2.0), 0.1);

        let left = if cmd.left_forward {
            cmd.left_speed as i32
        } else {
            -(cmd.left_speed as i32)
        };
        let right = if cmd.right_forward {
            cmd.right_speed as i32
        } else {
            -(cmd.right_speed as i32)
        };
        assert!(right > left, "left={} right={}", left, right);
    }

    #[test]
    fn test_large_heading_error_turns_in_place() {
        let mut drive = controller();
        // Target directly behind.
        let pose = Pose2D::new(0.0, 0.0, 0.0);
        let cmd = drive.steer(&pose, &Waypoint::new(-3.0, 0.01), 0.1);

        // Wheels should counter-rotate (or nearly so): forward drive
        // content is gone.
        let forward_sum = (if cmd.left_forward { 1 } else { -1 }) * cmd.left_speed as i32
            + (if cmd.right_forward { 1 } else { -1 }) * cmd.right_speed as i32;
        assert!(
            forward_sum.abs() < 30,
            "no net forward drive expected, got {}",
            forward_sum
        );
    }

    #[test]
    fn test_heading_error_past_threshold_slows_linear() {
        let mut aligned = controller();
        let straight = aligned.steer(&Pose2D::home(), &Waypoint::new(2.0, 0.0), 0.1);

        let mut skewed = controller();
        let turned = skewed.steer(
            &Pose2D::new(0.0, 0.0, FRAC_PI_2 + 0.6),
            &Waypoint::new(2.0, 0.0),
            0.1,
        );

        let forward = |cmd: &MotorCommand| {
            (if cmd.left_forward { 1 } else { -1 }) * cmd.left_speed as i32
                + (if cmd.right_forward { 1 } else { -1 }) * cmd.right_speed as i32
        };
        assert!(forward(&straight) > forward(&turned));
    }
}

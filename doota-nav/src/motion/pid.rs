//! PID controller.

use serde::Deserialize;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// Single-axis PID loop.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    integral: f32,
    previous_error: f32,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// Step the loop with the current error and interval.
    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        self.integral += error * dt;

        let derivative = if dt > 0.0 {
            (error - self.previous_error) / dt
        } else {
            0.0
        };
        self.previous_error = error;

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    /// Clear accumulated state before a new maneuver.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_proportional_only() {
        let mut pid = Pid::new(PidGains::new(2.0, 0.0, 0.0));
        assert_relative_eq!(pid.update(1.5, 0.1), 3.0);
    }

    #[test]
    fn test_integral_accumulates() {
        let mut pid = Pid::new(PidGains::new(0.0, 1.0, 0.0));
        pid.update(1.0, 0.5);
        let out = pid.update(1.0, 0.5);
        assert_relative_eq!(out, 1.0);
    }

    #[test]
    fn test_derivative_reacts_to_change() {
        let mut pid = Pid::new(PidGains::new(0.0, 0.0, 1.0));
        pid.update(0.0, 0.1);
        let out = pid.update(1.0, 0.1);
        assert_relative_eq!(out, 10.0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut pid = Pid::new(PidGains::new(0.0, 1.0, 1.0));
        pid.update(2.0, 0.5);
        pid.reset();
        let out = pid.update(0.0, 0.5);
        assert_relative_eq!(out, 0.0);
    }
}

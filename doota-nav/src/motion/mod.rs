//! Waypoint-following motion control.

mod drive;
mod pid;

pub use drive::{DriveConfig, DriveController, MotorCommand};
pub use pid::{Pid, PidGains};

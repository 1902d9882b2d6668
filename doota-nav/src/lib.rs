//! DootaNav - Navigation core for the Doota delivery robot
//!
//! Fuses wheel odometry with 2-D laser scans against a known occupancy
//! grid, plans grid paths with inflated clearance, and follows them with a
//! pair of PID loops. The [`navigator::Navigator`] façade composes the
//! pieces behind three calls: `navigate_to(x, y)`, `stop()`,
//! `current_pose()`.

pub mod core;
pub mod error;
pub mod localization;
pub mod map;
pub mod motion;
pub mod navigator;
pub mod odometry;
pub mod planning;
pub mod shared;

// Re-export commonly used types
pub use crate::core::{Point2D, Pose2D};
pub use error::{NavError, Result};
pub use map::OccupancyMap;
pub use navigator::{NavHandle, Navigator, NavigatorConfig};
pub use planning::{Path, Waypoint};

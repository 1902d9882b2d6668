//! Core geometry types and angular math.

pub mod math;
mod pose;

pub use pose::{Point2D, Pose2D};

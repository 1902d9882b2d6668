//! Grid path planning.

mod astar;
mod path;

pub use astar::{AStarPlanner, PlannerConfig};
pub use path::{Path, Waypoint, DEFAULT_TOLERANCE};

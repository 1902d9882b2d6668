//! Waypoint paths.

use crate::core::Point2D;
use serde::{Deserialize, Serialize};

/// Arrival tolerance a waypoint gets unless one is set explicitly (m).
pub const DEFAULT_TOLERANCE: f32 = 0.10;

/// A target point with an arrival tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f32,
    pub y: f32,
    pub tolerance: f32,
}

impl Waypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(x: f32, y: f32, tolerance: f32) -> Self {
        Self { x, y, tolerance }
    }

    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    #[inline]
    pub fn distance_to(&self, other: &Waypoint) -> f32 {
        self.position().distance(&other.position())
    }
}

/// An ordered sequence of waypoints from start to goal.
#[derive(Debug, Clone, Default)]
pub struct Path {
    waypoints: Vec<Waypoint>,
}

impl Path {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn first(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    /// Waypoints from `index` onwards.
    pub fn remaining(&self, index: usize) -> &[Waypoint] {
        &self.waypoints[index.min(self.waypoints.len())..]
    }

    /// Sum of segment lengths (m).
    pub fn total_length(&self) -> f32 {
        self.waypoints
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// Remove interior waypoints collinear with their neighbours.
    pub fn simplify_collinear(&mut self) {
        if self.waypoints.len() < 3 {
            return;
        }

        let mut kept = vec![self.waypoints[0]];
        for i in 1..self.waypoints.len() - 1 {
            let prev = kept.last().copied().unwrap_or(self.waypoints[i - 1]);
            let here = self.waypoints[i];
            let next = self.waypoints[i + 1];

            // Cross product of (prev->here) x (prev->next), zero when the
            // three points are on one line.
            let cross = (here.x - prev.x) * (next.y - prev.y)
                - (here.y - prev.y) * (next.x - prev.x);
            if cross.abs() > 1e-4 {
                kept.push(here);
            }
        }
        kept.push(*self.waypoints.last().unwrap());
        self.waypoints = kept;
    }

    /// Insert intermediate waypoints so consecutive pairs are no further
    /// than `max_spacing` apart. The final waypoint keeps its tolerance.
    pub fn resample(&mut self, max_spacing: f32) {
        if self.waypoints.len() < 2 || max_spacing <= 0.0 {
            return;
        }

        let mut resampled = vec![self.waypoints[0]];
        for window in self.waypoints.clone().windows(2) {
            let (a, b) = (window[0], window[1]);
            let length = a.distance_to(&b);
            let segments = (length / max_spacing).ceil().max(1.0) as usize;
            for i in 1..=segments {
                let t = i as f32 / segments as f32;
                let x = a.x + (b.x - a.x) * t;
                let y = a.y + (b.y - a.y) * t;
                if i == segments {
                    resampled.push(Waypoint::with_tolerance(x, y, b.tolerance));
                } else {
                    resampled.push(Waypoint::new(x, y));
                }
            }
        }
        self.waypoints = resampled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_total_length() {
        let path = Path::new(vec![
            Waypoint::new(0.0, 0.0),
            Waypoint::new(3.0, 0.0),
            Waypoint::new(3.0, 4.0),
        ]);
        assert_relative_eq!(path.total_length(), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_simplify_removes_collinear_interior() {
        let mut path = Path::new(vec![
            Waypoint::new(0.0, 0.0),
            Waypoint::new(1.0, 0.0),
            Waypoint::new(2.0, 0.0),
            Waypoint::new(2.0, 1.0),
            Waypoint::new(2.0, 2.0),
        ]);
        path.simplify_collinear();

        let xs: Vec<(f32, f32)> = path.waypoints().iter().map(|w| (w.x, w.y)).collect();
        assert_eq!(xs, vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0)]);
    }

    #[test]
    fn test_resample_caps_spacing() {
        let mut path = Path::new(vec![Waypoint::new(0.0, 0.0), Waypoint::new(2.0, 0.0)]);
        path.resample(0.5);

        for window in path.waypoints().windows(2) {
            assert!(window[0].distance_to(&window[1]) <= 0.5 + 1e-5);
        }
        let last = path.last().unwrap();
        assert_relative_eq!(last.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_resample_preserves_goal_tolerance() {
        let mut path = Path::new(vec![
            Waypoint::new(0.0, 0.0),
            Waypoint::with_tolerance(3.0, 0.0, 0.05),
        ]);
        path.resample(0.5);
        assert_relative_eq!(path.last().unwrap().tolerance, 0.05);
    }
}

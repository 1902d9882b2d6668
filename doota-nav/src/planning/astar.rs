//! A* grid planner.
//!
//! Runs on the inflated occupancy map: any free cell is traversable with
//! the robot's clearance already accounted for. The grid is 8-connected
//! with Euclidean step costs, the heuristic is straight-line distance
//! (admissible and consistent), ties break toward lower g, and expanded
//! cells land in a closed set that forbids re-expansion.

use super::path::{Path, Waypoint, DEFAULT_TOLERANCE};
use crate::core::Point2D;
use crate::error::NavError;
use crate::map::{CellState, OccupancyMap};

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Planner parameters.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Expansion budget before giving up.
    pub max_iterations: usize,
    /// Maximum spacing between consecutive output waypoints (m).
    pub waypoint_spacing: f32,
    /// How far to search for a free cell when an endpoint is blocked (m).
    pub snap_radius: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            waypoint_spacing: 0.5,
            snap_radius: 0.5,
        }
    }
}

/// A* planner over an inflated grid.
#[derive(Debug, Clone)]
pub struct AStarPlanner {
    config: PlannerConfig,
}

impl AStarPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan from `start` to `goal` on `map` (already inflated).
    ///
    /// The returned path runs from the start cell centre to the goal cell
    /// centre, collinear interior waypoints removed and spacing capped at
    /// the configured maximum. Endpoints inside blocked cells snap to the
    /// nearest free cell within the snap radius; failing that the plan is
    /// `PathNotFound`.
    pub fn plan(
        &self,
        map: &OccupancyMap,
        start: Point2D,
        goal: Point2D,
    ) -> Result<Path, NavError> {
        let start_cell = self.usable_cell(map, start)?;
        let goal_cell = self.usable_cell(map, goal)?;

        if start_cell == goal_cell {
            let centre = map.cell_to_world(goal_cell.0, goal_cell.1);
            return Ok(Path::new(vec![Waypoint::with_tolerance(
                centre.x,
                centre.y,
                DEFAULT_TOLERANCE,
            )]));
        }

        let cells = self.search(map, start_cell, goal_cell)?;

        let waypoints: Vec<Waypoint> = cells
            .iter()
            .map(|&(cx, cy)| {
                let centre = map.cell_to_world(cx, cy);
                Waypoint::new(centre.x, centre.y)
            })
            .collect();

        let mut path = Path::new(waypoints);
        path.simplify_collinear();
        path.resample(self.config.waypoint_spacing);
        Ok(path)
    }

    /// Resolve a world point to a free cell, snapping outward if blocked.
    fn usable_cell(
        &self,
        map: &OccupancyMap,
        point: Point2D,
    ) -> Result<(usize, usize), NavError> {
        let cell = map
            .world_to_cell(point.x, point.y)
            .ok_or(NavError::PathNotFound)?;

        if map.cell(cell.0, cell.1) == CellState::Free {
            return Ok(cell);
        }

        let max_cells = (self.config.snap_radius / map.resolution()).ceil() as i64;
        nearest_free(map, cell, max_cells).ok_or(NavError::PathNotFound)
    }

    /// A* search returning the cell chain from start to goal.
    fn search(
        &self,
        map: &OccupancyMap,
        start: (usize, usize),
        goal: (usize, usize),
    ) -> Result<Vec<(usize, usize)>, NavError> {
        let (width, height) = map.dimensions();
        let index = |(cx, cy): (usize, usize)| cy * width + cx;

        let mut open = BinaryHeap::new();
        let mut closed = vec![false; width * height];
        let mut g_score = vec![f32::INFINITY; width * height];
        let mut came_from: Vec<u32> = vec![u32::MAX; width * height];

        g_score[index(start)] = 0.0;
        open.push(Node {
            cell: start,
            f: heuristic(start, goal),
            g: 0.0,
        });

        let mut iterations = 0usize;

        while let Some(node) = open.pop() {
            let node_idx = index(node.cell);
            if closed[node_idx] {
                continue;
            }
            closed[node_idx] = true;

            iterations += 1;
            if iterations > self.config.max_iterations {
                log::warn!("planner exhausted {} iterations", iterations - 1);
                return Err(NavError::PathNotFound);
            }

            if node.cell == goal {
                return Ok(backtrack(&came_from, width, start, goal));
            }

            let current_g = g_score[node_idx];
            for (neighbor, step) in neighbors(map, node.cell) {
                let neighbor_idx = index(neighbor);
                if closed[neighbor_idx] {
                    continue;
                }
                let tentative = current_g + step;
                if tentative < g_score[neighbor_idx] {
                    g_score[neighbor_idx] = tentative;
                    came_from[neighbor_idx] = node_idx as u32;
                    open.push(Node {
                        cell: neighbor,
                        f: tentative + heuristic(neighbor, goal),
                        g: tentative,
                    });
                }
            }
        }

        Err(NavError::PathNotFound)
    }
}

/// Open-set entry; min-heap by f, ties toward lower g.
#[derive(Debug, Clone, Copy)]
struct Node {
    cell: (usize, usize),
    f: f32,
    g: f32,
}

impl Eq for Node {}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.g == other.g
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for lowest-f-first, breaking
        // ties toward the lower g.
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                other
                    .g
                    .partial_cmp(&self.g)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Walk the predecessor chain from goal back to start.
fn backtrack(
    came_from: &[u32],
    width: usize,
    start: (usize, usize),
    goal: (usize, usize),
) -> Vec<(usize, usize)> {
    let start_idx = start.1 * width + start.0;
    let mut current = goal.1 * width + goal.0;
    let mut cells = vec![goal];

    while current != start_idx {
        let prev = came_from[current];
        if prev == u32::MAX {
            break;
        }
        current = prev as usize;
        cells.push((current % width, current / width));
    }

    cells.reverse();
    cells
}

#[inline]
fn heuristic(a: (usize, usize), b: (usize, usize)) -> f32 {
    let dx = a.0 as f32 - b.0 as f32;
    let dy = a.1 as f32 - b.1 as f32;
    (dx * dx + dy * dy).sqrt()
}

/// Free 8-neighbours with their step costs; diagonals only when both
/// adjacent cardinals are free (no corner cutting).
fn neighbors(map: &OccupancyMap, cell: (usize, usize)) -> Vec<((usize, usize), f32)> {
    let (width, height) = map.dimensions();
    let (cx, cy) = (cell.0 as i64, cell.1 as i64);
    let mut result = Vec::with_capacity(8);

    let free = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && map.cell(x as usize, y as usize) == CellState::Free
    };

    for (dx, dy) in [(0i64, 1i64), (1, 0), (0, -1), (-1, 0)] {
        if free(cx + dx, cy + dy) {
            result.push((((cx + dx) as usize, (cy + dy) as usize), 1.0));
        }
    }

    let sqrt2 = std::f32::consts::SQRT_2;
    for (dx, dy) in [(1i64, 1i64), (1, -1), (-1, 1), (-1, -1)] {
        if free(cx + dx, cy + dy) && free(cx + dx, cy) && free(cx, cy + dy) {
            result.push((((cx + dx) as usize, (cy + dy) as usize), sqrt2));
        }
    }

    result
}

/// Ring search outward from a blocked cell for the nearest free one.
fn nearest_free(
    map: &OccupancyMap,
    from: (usize, usize),
    max_cells: i64,
) -> Option<(usize, usize)> {
    let (width, height) = map.dimensions();
    let (fx, fy) = (from.0 as i64, from.1 as i64);

    for radius in 1..=max_cells {
        let mut best: Option<((usize, usize), i64)> = None;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs() != radius && dy.abs() != radius {
                    continue; // interior of the ring was covered earlier
                }
                let nx = fx + dx;
                let ny = fy + dy;
                if nx < 0 || ny < 0 || nx as usize >= width || ny as usize >= height {
                    continue;
                }
                if map.cell(nx as usize, ny as usize) == CellState::Free {
                    let dist_sq = dx * dx + dy * dy;
                    if best.map_or(true, |(_, d)| dist_sq < d) {
                        best = Some(((nx as usize, ny as usize), dist_sq));
                    }
                }
            }
        }
        if let Some((cell, _)) = best {
            return Some(cell);
        }
    }

    None
}

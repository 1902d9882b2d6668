//! Static occupancy grid
//!
//! The map is loaded once at startup from a YAML description and never
//! mutated afterwards. Derived maps (obstacle inflation for planning, a
//! transient overlay of lidar-detected obstacles for replanning checks) are
//! fresh copies; the base grid is shared immutably.

mod file;

pub use file::{MapError, MapFile, Obstacle};

use crate::core::Point2D;

/// Three-valued cell classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Free,
    Occupied,
    Unknown,
}

/// Dense 2-D occupancy grid with world-frame anchoring.
#[derive(Debug, Clone)]
pub struct OccupancyMap {
    width: usize,
    height: usize,
    resolution: f32,
    origin: Point2D,
    cells: Vec<CellState>,
}

impl OccupancyMap {
    /// All-free grid covering `width_m` x `height_m` meters.
    pub fn new_free(width_m: f32, height_m: f32, resolution: f32, origin: Point2D) -> Self {
        let width = (width_m / resolution).round() as usize;
        let height = (height_m / resolution).round() as usize;
        Self {
            width,
            height,
            resolution,
            origin,
            cells: vec![CellState::Free; width * height],
        }
    }

    /// Grid dimensions in cells.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Meters per cell.
    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    /// World position of the (0, 0) cell corner.
    pub fn origin(&self) -> Point2D {
        self.origin
    }

    /// World coordinates to cell indices, `None` outside the grid.
    #[inline]
    pub fn world_to_cell(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let cx = ((x - self.origin.x) / self.resolution).floor() as i64;
        let cy = ((y - self.origin.y) / self.resolution).floor() as i64;
        if cx >= 0 && cy >= 0 && (cx as usize) < self.width && (cy as usize) < self.height {
            Some((cx as usize, cy as usize))
        } else {
            None
        }
    }

    /// Cell indices to the world coordinates of the cell centre.
    #[inline]
    pub fn cell_to_world(&self, cx: usize, cy: usize) -> Point2D {
        Point2D::new(
            self.origin.x + (cx as f32 + 0.5) * self.resolution,
            self.origin.y + (cy as f32 + 0.5) * self.resolution,
        )
    }

    /// State of the cell containing a world point; `Unknown` off-grid.
    pub fn cell_at(&self, x: f32, y: f32) -> CellState {
        match self.world_to_cell(x, y) {
            Some((cx, cy)) => self.cell(cx, cy),
            None => CellState::Unknown,
        }
    }

    /// State by cell indices; callers must stay in bounds.
    #[inline]
    pub fn cell(&self, cx: usize, cy: usize) -> CellState {
        self.cells[cy * self.width + cx]
    }

    /// True when a goal is inside the grid and on a free cell.
    ///
    /// Meaningful on an inflated map, where "free" already accounts for the
    /// robot's clearance radius.
    pub fn is_reachable(&self, x: f32, y: f32) -> bool {
        self.cell_at(x, y) == CellState::Free
    }

    pub(crate) fn set_cell(&mut self, cx: usize, cy: usize, state: CellState) {
        self.cells[cy * self.width + cx] = state;
    }

    /// Expected range from `(x, y)` along `angle` to the first occupied
    /// cell, capped at `max_range`.
    ///
    /// Steps at half the grid resolution; used by the localizer's
    /// measurement model. Leaving the grid returns `max_range`.
    pub fn ray_cast(&self, x: f32, y: f32, angle: f32, max_range: f32) -> f32 {
        let step = self.resolution / 2.0;
        let (sin_a, cos_a) = angle.sin_cos();
        let dx = cos_a * step;
        let dy = sin_a * step;

        let mut cx = x;
        let mut cy = y;
        let mut distance = 0.0;

        while distance < max_range {
            match self.world_to_cell(cx, cy) {
                None => return max_range,
                Some((gx, gy)) => {
                    if self.cell(gx, gy) == CellState::Occupied {
                        return distance;
                    }
                }
            }
            cx += dx;
            cy += dy;
            distance += step;
        }

        max_range
    }

    /// Derived map with every occupied cell's free neighbourhood within
    /// `radius` reclassified as occupied.
    pub fn inflate(&self, radius: f32) -> OccupancyMap {
        let mut inflated = self.clone();
        let cells_radius = (radius / self.resolution).ceil() as i64;

        for cy in 0..self.height {
            for cx in 0..self.width {
                if self.cell(cx, cy) == CellState::Occupied {
                    inflated.stamp_disc(cx as i64, cy as i64, cells_radius);
                }
            }
        }

        inflated
    }

    /// Derived map with obstacle discs stamped at the given world points.
    ///
    /// Used to overlay lidar-detected obstacles for replanning checks; the
    /// base map stays untouched.
    pub fn with_obstacles(&self, points: &[Point2D], radius: f32) -> OccupancyMap {
        let mut overlay = self.clone();
        let cells_radius = (radius / self.resolution).ceil() as i64;

        for point in points {
            if let Some((cx, cy)) = self.world_to_cell(point.x, point.y) {
                overlay.stamp_disc(cx as i64, cy as i64, cells_radius);
            }
        }

        overlay
    }

    /// Mark a Euclidean disc of cells occupied.
    fn stamp_disc(&mut self, cx: i64, cy: i64, cells_radius: i64) {
        for dy in -cells_radius..=cells_radius {
            for dx in -cells_radius..=cells_radius {
                if dx * dx + dy * dy > cells_radius * cells_radius {
                    continue;
                }
                let nx = cx + dx;
                let ny = cy + dy;
                if nx >= 0 && ny >= 0 && (nx as usize) < self.width && (ny as usize) < self.height {
                    self.set_cell(nx as usize, ny as usize, CellState::Occupied);
                }
            }
        }
    }
}

//! Map file loading
//!
//! The environment map is a YAML document:
//!
//! ```yaml
//! resolution: 0.05
//! width: 10.0
//! height: 10.0
//! origin: [0.0, 0.0]
//! obstacles:
//!   - type: rectangle
//!     x: 2.0
//!     y: 3.0
//!     width: 1.0
//!     height: 0.5
//!   - type: polygon
//!     points: [[6.0, 6.0], [7.0, 6.0], [6.5, 7.0]]
//! ```
//!
//! Loading rejects maps with non-positive resolution and obstacles outside
//! the extent.

use super::{CellState, OccupancyMap};
use crate::core::Point2D;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Map loading failures.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse map file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("map resolution must be positive, got {0}")]
    InvalidResolution(f32),

    #[error("map extent must be positive, got {width}x{height}")]
    InvalidExtent { width: f32, height: f32 },

    #[error("obstacle {index} extends outside the map extent")]
    ObstacleOutOfBounds { index: usize },

    #[error("polygon obstacle {index} has fewer than 3 points")]
    DegeneratePolygon { index: usize },
}

/// One static obstacle.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Obstacle {
    Rectangle {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Polygon {
        points: Vec<[f32; 2]>,
    },
}

/// Parsed map description.
#[derive(Debug, Clone, Deserialize)]
pub struct MapFile {
    pub resolution: f32,
    pub width: f32,
    pub height: f32,
    pub origin: [f32; 2],
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
}

impl MapFile {
    /// Load and parse a map file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MapError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a map from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MapError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate and rasterize into an occupancy grid.
    pub fn build(&self) -> Result<OccupancyMap, MapError> {
        if self.resolution <= 0.0 {
            return Err(MapError::InvalidResolution(self.resolution));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(MapError::InvalidExtent {
                width: self.width,
                height: self.height,
            });
        }

        let origin = Point2D::new(self.origin[0], self.origin[1]);
        let max_x = origin.x + self.width;
        let max_y = origin.y + self.height;

        for (index, obstacle) in self.obstacles.iter().enumerate() {
            match obstacle {
                Obstacle::Rectangle {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if *x < origin.x || *y < origin.y || x + width > max_x || y + height > max_y {
                        return Err(MapError::ObstacleOutOfBounds { index });
                    }
                }
                Obstacle::Polygon { points } => {
                    if points.len() < 3 {
                        return Err(MapError::DegeneratePolygon { index });
                    }
                    for p in points {
                        if p[0] < origin.x || p[1] < origin.y || p[0] > max_x || p[1] > max_y {
                            return Err(MapError::ObstacleOutOfBounds { index });
                        }
                    }
                }
            }
        }

        let mut map = OccupancyMap::new_free(self.width, self.height, self.resolution, origin);
        for obstacle in &self.obstacles {
            rasterize(&mut map, obstacle);
        }

        log::info!(
            "map loaded: {}x{} cells at {}m, {} obstacles",
            map.dimensions().0,
            map.dimensions().1,
            self.resolution,
            self.obstacles.len()
        );

        Ok(map)
    }
}

fn rasterize(map: &mut OccupancyMap, obstacle: &Obstacle) {
    let (width, height) = map.dimensions();
    match obstacle {
        Obstacle::Rectangle {
            x,
            y,
            width: w,
            height: h,
        } => {
            for cy in 0..height {
                for cx in 0..width {
                    let centre = map.cell_to_world(cx, cy);
                    if centre.x >= *x && centre.x <= x + w && centre.y >= *y && centre.y <= y + h {
                        map.set_cell(cx, cy, CellState::Occupied);
                    }
                }
            }
        }
        Obstacle::Polygon { points } => {
            for cy in 0..height {
                for cx in 0..width {
                    let centre = map.cell_to_world(cx, cy);
                    if point_in_polygon(centre.x, centre.y, points) {
                        map.set_cell(cx, cy, CellState::Occupied);
                    }
                }
            }
        }
    }
}

/// Even-odd rule point-in-polygon test.
fn point_in_polygon(x: f32, y: f32, points: &[[f32; 2]]) -> bool {
    let mut inside = false;
    let n = points.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (points[i][0], points[i][1]);
        let (xj, yj) = (points[j][0], points[j][1]);
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SQUARE: &str = r#"
resolution: 0.05
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles: []
"#;

    #[test]
    fn test_load_empty_square() {
        let map = MapFile::from_yaml_str(EMPTY_SQUARE).unwrap().build().unwrap();
        assert_eq!(map.dimensions(), (200, 200));
        assert_eq!(map.cell_at(5.0, 5.0), CellState::Free);
    }

    #[test]
    fn test_rectangle_rasterized() {
        let yaml = r#"
resolution: 0.1
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles:
  - type: rectangle
    x: 2.0
    y: 2.0
    width: 1.0
    height: 1.0
"#;
        let map = MapFile::from_yaml_str(yaml).unwrap().build().unwrap();
        assert_eq!(map.cell_at(2.5, 2.5), CellState::Occupied);
        assert_eq!(map.cell_at(4.0, 4.0), CellState::Free);
    }

    #[test]
    fn test_polygon_rasterized() {
        let yaml = r#"
resolution: 0.1
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles:
  - type: polygon
    points: [[4.0, 4.0], [6.0, 4.0], [5.0, 6.0]]
"#;
        let map = MapFile::from_yaml_str(yaml).unwrap().build().unwrap();
        // Triangle centroid is inside, corner region outside.
        assert_eq!(map.cell_at(5.0, 4.5), CellState::Occupied);
        assert_eq!(map.cell_at(4.1, 5.5), CellState::Free);
    }

    #[test]
    fn test_rejects_non_positive_resolution() {
        let yaml = r#"
resolution: 0.0
width: 10.0
height: 10.0
origin: [0.0, 0.0]
"#;
        let result = MapFile::from_yaml_str(yaml).unwrap().build();
        assert!(matches!(result, Err(MapError::InvalidResolution(_))));
    }

    #[test]
    fn test_rejects_obstacle_outside_extent() {
        let yaml = r#"
resolution: 0.1
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles:
  - type: rectangle
    x: 9.5
    y: 9.5
    width: 2.0
    height: 2.0
"#;
        let result = MapFile::from_yaml_str(yaml).unwrap().build();
        assert!(matches!(
            result,
            Err(MapError::ObstacleOutOfBounds { index: 0 })
        ));
    }

    #[test]
    fn test_rejects_degenerate_polygon() {
        let yaml = r#"
resolution: 0.1
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles:
  - type: polygon
    points: [[1.0, 1.0], [2.0, 2.0]]
"#;
        let result = MapFile::from_yaml_str(yaml).unwrap().build();
        assert!(matches!(
            result,
            Err(MapError::DegeneratePolygon { index: 0 })
        ));
    }
}

//! Lidar scanner driver and person-cluster detector
//!
//! The scanner streams binary frames over its own serial port:
//!
//! ```text
//! byte 0      header (0x54)
//! byte 1      data length
//! bytes 2-3   start angle, LE, 0.01 degree units
//! bytes 4-39  12 measurements of (distance u16 LE mm, intensity u8)
//! bytes 40-41 end angle, LE, 0.01 degree units
//! bytes 42-43 timestamp
//! byte 44     checksum
//! ```
//!
//! Frames are assembled into full revolutions; the detector walks one
//! revolution looking for clusters of close returns that look like a pair
//! of legs.

use crate::error::Result;
use crate::scan::{LaserScan, ScanPoint};
use crate::transport::Transport;

/// Frame header byte.
pub const FRAME_HEADER: u8 = 0x54;
/// Total frame size in bytes, header included.
pub const FRAME_SIZE: usize = 45;
/// Measurements per frame.
pub const POINTS_PER_FRAME: usize = 12;

/// Scanner and detector tuning.
#[derive(Debug, Clone)]
pub struct LidarConfig {
    /// Returns closer than this are noise and dropped (m).
    pub min_range: f32,
    /// Returns farther than this are dropped (m).
    pub max_range: f32,
    /// Person clusters are only considered in this range band (m).
    pub person_min_range: f32,
    pub person_max_range: f32,
    /// Minimum returns for a cluster to count as a person.
    pub person_min_points: usize,
    /// Angular gap that splits clusters (rad).
    pub cluster_angle_gap: f32,
    /// Range discontinuity that splits clusters (m).
    pub cluster_range_jump: f32,
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            min_range: 0.05,
            max_range: 10.0,
            person_min_range: 0.2,
            person_max_range: 2.0,
            person_min_points: 3,
            cluster_angle_gap: 0.12,
            cluster_range_jump: 0.3,
        }
    }
}

/// Parse one frame into scan points, filtering out-of-range returns.
///
/// Angles are interpolated linearly between the frame's start and end
/// angles. The checksum byte is not validated beyond frame length; the
/// sensor's own CRC scheme is proprietary and a bad frame only costs one
/// twelfth of a revolution.
pub fn parse_frame(frame: &[u8], config: &LidarConfig) -> Vec<ScanPoint> {
    let mut points = Vec::with_capacity(POINTS_PER_FRAME);
    if frame.len() < FRAME_SIZE || frame[0] != FRAME_HEADER {
        return points;
    }

    let start_deg = u16::from_le_bytes([frame[2], frame[3]]) as f32 / 100.0;
    let end_deg = u16::from_le_bytes([frame[40], frame[41]]) as f32 / 100.0;

    let mut sweep = end_deg - start_deg;
    if sweep < 0.0 {
        sweep += 360.0;
    }
    let step = sweep / (POINTS_PER_FRAME - 1) as f32;

    for i in 0..POINTS_PER_FRAME {
        let offset = 4 + i * 3;
        let distance_mm = u16::from_le_bytes([frame[offset], frame[offset + 1]]);
        let intensity = frame[offset + 2];
        let distance = distance_mm as f32 / 1000.0;

        if distance < config.min_range || distance > config.max_range {
            continue;
        }

        let angle_deg = (start_deg + i as f32 * step) % 360.0;
        points.push(ScanPoint::new(distance, angle_deg.to_radians(), intensity));
    }

    points
}

/// Source of full-revolution scans.
pub trait ScanSource: Send {
    /// The next complete revolution, handed out at most once.
    ///
    /// Returning each revolution exactly once keeps the localizer's
    /// measurement updates from re-consuming a stale scan.
    fn latest_scan(&mut self) -> Option<LaserScan>;
}

/// Source of person detections in the robot frame.
pub trait PersonSource: Send {
    /// Nearest person-like cluster as (x forward, y left) in meters.
    fn detect_person(&mut self) -> Option<(f32, f32)>;
}

/// A cluster of close returns.
#[derive(Debug, Clone, Copy)]
pub struct PersonCluster {
    /// Centroid, robot frame (m).
    pub x: f32,
    pub y: f32,
    /// Distance from the robot to the centroid (m).
    pub distance: f32,
    /// Number of returns in the cluster.
    pub points: usize,
}

/// Walk one revolution and extract person-like clusters.
pub fn detect_person_clusters(scan: &LaserScan, config: &LidarConfig) -> Vec<PersonCluster> {
    let candidates: Vec<&ScanPoint> = scan
        .points()
        .iter()
        .filter(|p| p.distance >= config.person_min_range && p.distance <= config.person_max_range)
        .collect();

    let mut clusters = Vec::new();
    let mut current: Vec<&ScanPoint> = Vec::new();

    for point in candidates {
        let split = match current.last() {
            Some(prev) => {
                (point.angle - prev.angle).abs() > config.cluster_angle_gap
                    || (point.distance - prev.distance).abs() > config.cluster_range_jump
            }
            None => false,
        };
        if split {
            if let Some(cluster) = finish_cluster(&current, config) {
                clusters.push(cluster);
            }
            current.clear();
        }
        current.push(point);
    }
    if let Some(cluster) = finish_cluster(&current, config) {
        clusters.push(cluster);
    }

    clusters
}

fn finish_cluster(points: &[&ScanPoint], config: &LidarConfig) -> Option<PersonCluster> {
    if points.len() < config.person_min_points {
        return None;
    }
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for p in points {
        let (x, y) = p.to_cartesian();
        sum_x += x;
        sum_y += y;
    }
    let n = points.len() as f32;
    let x = sum_x / n;
    let y = sum_y / n;
    Some(PersonCluster {
        x,
        y,
        distance: (x * x + y * y).sqrt(),
        points: points.len(),
    })
}

/// Streaming lidar driver.
///
/// Call [`LidarScanner::poll`] (or any of the source trait methods, which
/// poll internally) often enough to keep the port buffer drained.
pub struct LidarScanner {
    transport: Box<dyn Transport>,
    config: LidarConfig,
    frame: Vec<u8>,
    revolution: Vec<ScanPoint>,
    last_start_angle: Option<f32>,
    latest: Option<LaserScan>,
    fresh: bool,
}

impl LidarScanner {
    pub fn new(transport: Box<dyn Transport>, config: LidarConfig) -> Self {
        Self {
            transport,
            config,
            frame: Vec::with_capacity(FRAME_SIZE),
            revolution: Vec::new(),
            last_start_angle: None,
            latest: None,
            fresh: false,
        }
    }

    /// Drain the port and assemble frames into revolutions.
    pub fn poll(&mut self) -> Result<()> {
        let mut buf = [0u8; 512];
        loop {
            let n = self.transport.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            for &byte in &buf[..n] {
                self.push_byte(byte);
            }
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if self.frame.is_empty() && byte != FRAME_HEADER {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == FRAME_SIZE {
            let start_deg = u16::from_le_bytes([self.frame[2], self.frame[3]]) as f32 / 100.0;

            // A start angle below the previous frame's means the scanner
            // wrapped past 0 degrees: the revolution is complete.
            if let Some(last) = self.last_start_angle {
                if start_deg < last && !self.revolution.is_empty() {
                    let points = std::mem::take(&mut self.revolution);
                    self.latest = Some(LaserScan::from_points(points));
                    self.fresh = true;
                }
            }
            self.last_start_angle = Some(start_deg);

            let frame = std::mem::take(&mut self.frame);
            self.revolution.extend(parse_frame(&frame, &self.config));
        }
    }
}

impl ScanSource for LidarScanner {
    fn latest_scan(&mut self) -> Option<LaserScan> {
        if let Err(e) = self.poll() {
            log::warn!("lidar poll failed: {}", e);
        }
        if self.fresh {
            self.fresh = false;
            self.latest.clone()
        } else {
            None
        }
    }
}

impl PersonSource for LidarScanner {
    fn detect_person(&mut self) -> Option<(f32, f32)> {
        if let Err(e) = self.poll() {
            log::warn!("lidar poll failed: {}", e);
        }
        // Peek at the last revolution without consuming it; the scan
        // stream itself belongs to the localizer.
        let scan = self.latest.as_ref()?;
        let clusters = detect_person_clusters(scan, &self.config);
        clusters
            .into_iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .map(|c| (c.x, c.y))
    }
}

/// Cloneable handle sharing one [`LidarScanner`] between the scan and
/// person consumers.
#[derive(Clone)]
pub struct SharedLidar {
    inner: std::sync::Arc<parking_lot::Mutex<LidarScanner>>,
}

impl SharedLidar {
    pub fn new(scanner: LidarScanner) -> Self {
        Self {
            inner: std::sync::Arc::new(parking_lot::Mutex::new(scanner)),
        }
    }
}

impl ScanSource for SharedLidar {
    fn latest_scan(&mut self) -> Option<LaserScan> {
        self.inner.lock().latest_scan()
    }
}

impl PersonSource for SharedLidar {
    fn detect_person(&mut self) -> Option<(f32, f32)> {
        self.inner.lock().detect_person()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use approx::assert_relative_eq;

    /// Build a frame with all 12 points at `distance_mm`, sweeping
    /// `start_deg..end_deg`.
    fn make_frame(start_deg: f32, end_deg: f32, distance_mm: u16) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = FRAME_HEADER;
        frame[1] = (POINTS_PER_FRAME * 3) as u8;
        frame[2..4].copy_from_slice(&((start_deg * 100.0) as u16).to_le_bytes());
        for i in 0..POINTS_PER_FRAME {
            let offset = 4 + i * 3;
            frame[offset..offset + 2].copy_from_slice(&distance_mm.to_le_bytes());
            frame[offset + 2] = 200;
        }
        frame[40..42].copy_from_slice(&((end_deg * 100.0) as u16).to_le_bytes());
        frame
    }

    #[test]
    fn test_parse_frame_angles_interpolated() {
        let frame = make_frame(0.0, 33.0, 1500);
        let points = parse_frame(&frame, &LidarConfig::default());

        assert_eq!(points.len(), POINTS_PER_FRAME);
        assert_relative_eq!(points[0].angle, 0.0, epsilon = 1e-4);
        assert_relative_eq!(points[11].angle, 33.0_f32.to_radians(), epsilon = 1e-3);
        for p in &points {
            assert_relative_eq!(p.distance, 1.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_parse_frame_filters_range() {
        // 20 mm is below min_range, 15000 mm is beyond max_range
        let too_close = make_frame(0.0, 33.0, 20);
        assert!(parse_frame(&too_close, &LidarConfig::default()).is_empty());

        let too_far = make_frame(0.0, 33.0, 15000);
        assert!(parse_frame(&too_far, &LidarConfig::default()).is_empty());
    }

    #[test]
    fn test_parse_frame_rejects_bad_header() {
        let mut frame = make_frame(0.0, 33.0, 1000);
        frame[0] = 0x55;
        assert!(parse_frame(&frame, &LidarConfig::default()).is_empty());
    }

    #[test]
    fn test_revolution_assembly() {
        let device = MockTransport::new();
        let mut scanner = LidarScanner::new(Box::new(device.clone()), LidarConfig::default());

        // Feed frames sweeping a full turn, then one wrapped frame to
        // close the revolution.
        for i in 0..10 {
            let start = i as f32 * 36.0;
            device.inject_read(&make_frame(start, start + 33.0, 2000));
        }
        device.inject_read(&make_frame(0.0, 33.0, 2000));

        let scan = scanner.latest_scan().expect("revolution should complete");
        assert_eq!(scan.len(), 10 * POINTS_PER_FRAME);
    }

    #[test]
    fn test_person_cluster_detection() {
        // Background at 5 m with a tight group of returns at 1 m ahead.
        let mut points = Vec::new();
        for i in 0..360 {
            let angle = (i as f32).to_radians();
            let distance = if i < 5 { 1.0 } else { 5.0 };
            points.push(ScanPoint::new(distance, angle, 100));
        }
        let scan = LaserScan::from_points(points);

        let clusters = detect_person_clusters(&scan, &LidarConfig::default());
        assert_eq!(clusters.len(), 1);
        let person = clusters[0];
        assert_eq!(person.points, 5);
        assert!(person.distance > 0.9 && person.distance < 1.1);
        // Nearly straight ahead
        assert!(person.y.abs() < 0.2);
    }

    #[test]
    fn test_no_person_in_empty_room() {
        let points: Vec<ScanPoint> = (0..360)
            .map(|i| ScanPoint::new(5.0, (i as f32).to_radians(), 100))
            .collect();
        let scan = LaserScan::from_points(points);

        assert!(detect_person_clusters(&scan, &LidarConfig::default()).is_empty());
    }
}

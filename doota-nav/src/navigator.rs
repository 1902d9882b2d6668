//! Navigator façade
//!
//! Composes the localizer, planner and drive controller behind three
//! calls: [`Navigator::navigate_to`], [`Navigator::stop`] and
//! [`Navigator::current_pose`].
//!
//! Two worker threads do the actual work:
//!
//! - the **localization thread** drains link telemetry in receipt order
//!   (odometry deltas strictly before the next measurement update), pulls
//!   lidar revolutions, and publishes the pose estimate;
//! - a **motion worker** exists only while one `navigate_to` is in flight.
//!   It follows the planned waypoints, supervises progress, reacts to IR
//!   proximity and scan obstacles, and reports through a single-shot
//!   completion channel. A zero-speed motor command is issued on every
//!   exit path.

use crate::core::{Point2D, Pose2D};
use crate::error::NavError;
use crate::localization::{Localizer, LocalizerConfig};
use crate::map::OccupancyMap;
use crate::motion::{DriveConfig, DriveController};
use crate::odometry::{OdometryConfig, OdometryIntegrator, TickTracker};
use crate::planning::{AStarPlanner, Path, PlannerConfig, Waypoint};
use crate::shared::NavShared;

use crossbeam_channel::{bounded, Receiver};
use doota_io::lidar::ScanSource;
use doota_io::{LaserScan, McuLink, Telemetry};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Navigator parameters.
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Arrival tolerance on the navigation goal (m).
    pub position_tolerance: f32,
    /// Obstacle inflation radius used for planning (m).
    pub obstacle_clearance: f32,
    /// A scan return this close to a remaining waypoint forces a replan (m).
    pub scan_obstacle_radius: f32,
    /// Scan returns beyond this range are not treated as obstacles (m).
    pub dynamic_obstacle_range: f32,
    /// IR proximity that triggers an emergency stop (m).
    pub ir_stop_distance: f32,
    /// Meters per raw IR unit (firmware reports centimetres).
    pub ir_scale_m: f32,
    /// How far to back away after an IR stop (m).
    pub backup_distance: f32,
    /// Wire speed used while backing up.
    pub backup_speed: u8,
    /// Approximate ground speed at `backup_speed`, for timing (m/s).
    pub backup_speed_mps: f32,
    /// IR stops tolerated in one navigation before failing.
    pub max_proximity_events: u32,
    /// Seconds without progress toward the goal before failing.
    pub no_progress_timeout_secs: f32,
    /// Goal-distance improvement that counts as progress (m).
    pub progress_epsilon: f32,
    /// Motion control loop rate (Hz).
    pub control_rate_hz: f32,
    /// Localization update rate (Hz), at least 5.
    pub localization_rate_hz: f32,
    /// Replans tolerated in one navigation.
    pub max_replans: u32,
    pub odometry: OdometryConfig,
    pub localizer: LocalizerConfig,
    pub planner: PlannerConfig,
    pub drive: DriveConfig,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 0.10,
            obstacle_clearance: 0.30,
            scan_obstacle_radius: 0.30,
            dynamic_obstacle_range: 2.5,
            ir_stop_distance: 0.10,
            ir_scale_m: 0.01,
            backup_distance: 0.20,
            backup_speed: 80,
            backup_speed_mps: 0.2,
            max_proximity_events: 3,
            no_progress_timeout_secs: 30.0,
            progress_epsilon: 0.05,
            control_rate_hz: 10.0,
            localization_rate_hz: 10.0,
            max_replans: 5,
            odometry: OdometryConfig::default(),
            localizer: LocalizerConfig::default(),
            planner: PlannerConfig::default(),
            drive: DriveConfig::default(),
        }
    }
}

/// Poll-able completion of one `navigate_to` call.
pub struct NavHandle {
    rx: Receiver<Result<(), NavError>>,
}

impl NavHandle {
    /// The outcome, once the motion worker has finished.
    pub fn poll(&self) -> Option<Result<(), NavError>> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for the outcome.
    pub fn wait(&self, timeout: Duration) -> Option<Result<(), NavError>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// The navigation façade.
pub struct Navigator {
    link: Arc<McuLink>,
    inflated: Arc<OccupancyMap>,
    shared: Arc<NavShared>,
    latest_scan: Arc<Mutex<Option<LaserScan>>>,
    config: NavigatorConfig,
    loc_worker: Option<JoinHandle<()>>,
    nav_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Navigator {
    /// Build the navigator and start its localization thread.
    pub fn new(
        link: Arc<McuLink>,
        scan_source: Box<dyn ScanSource>,
        map: OccupancyMap,
        start: Pose2D,
        config: NavigatorConfig,
    ) -> Self {
        let map = Arc::new(map);
        let inflated = Arc::new(map.inflate(config.obstacle_clearance));
        let shared = Arc::new(NavShared::new(start));
        let latest_scan = Arc::new(Mutex::new(None));

        let loc_worker = {
            let telemetry = link.telemetry();
            let map = Arc::clone(&map);
            let shared = Arc::clone(&shared);
            let latest_scan = Arc::clone(&latest_scan);
            let config = config.clone();
            std::thread::Builder::new()
                .name("localization".into())
                .spawn(move || {
                    localization_loop(telemetry, scan_source, map, shared, latest_scan, start, config)
                })
                .expect("failed to spawn localization thread")
        };

        Self {
            link,
            inflated,
            shared,
            latest_scan,
            config,
            loc_worker: Some(loc_worker),
            nav_worker: Mutex::new(None),
        }
    }

    /// Latest localizer estimate. Safe to call at any time.
    pub fn current_pose(&self) -> Pose2D {
        self.shared.pose.load(Ordering::Acquire)
    }

    /// Latest IR proximity reading in meters, if any has arrived.
    pub fn ir_distance(&self) -> Option<f32> {
        let d = self.shared.ir_distance.load(Ordering::Acquire);
        d.is_finite().then_some(d)
    }

    /// True when the localizer has declared divergence.
    pub fn localization_failed(&self) -> bool {
        self.shared.localization_failed.load(Ordering::Acquire)
    }

    /// Start navigating to a world position.
    ///
    /// At most one goal may be active; a second call fails with
    /// [`NavError::Busy`]. The returned handle completes exactly once.
    pub fn navigate_to(&self, x: f32, y: f32) -> Result<NavHandle, NavError> {
        if self.shared.navigating.swap(true, Ordering::AcqRel) {
            return Err(NavError::Busy);
        }
        self.shared.cancel.store(false, Ordering::Release);

        // Reap the previous worker, if any.
        if let Some(old) = self.nav_worker.lock().take() {
            let _ = old.join();
        }

        let (done_tx, done_rx) = bounded(1);
        let ctx = MotionContext {
            link: Arc::clone(&self.link),
            inflated: Arc::clone(&self.inflated),
            shared: Arc::clone(&self.shared),
            latest_scan: Arc::clone(&self.latest_scan),
            config: self.config.clone(),
            goal: Point2D::new(x, y),
        };

        let worker = std::thread::Builder::new()
            .name("motion".into())
            .spawn(move || {
                let result = follow_goal(&ctx);

                // Zero-speed on every exit path. A failure here means the
                // link itself is gone, which outranks the original result.
                let stop_result = ctx.link.send_motor_stop();
                let result = match (result, stop_result) {
                    (Ok(()), Err(e)) => Err(NavError::Link(e)),
                    (result, _) => result,
                };

                if let Err(ref e) = result {
                    log::warn!("navigation to ({:.2}, {:.2}) failed: {}", ctx.goal.x, ctx.goal.y, e);
                }
                ctx.shared.navigating.store(false, Ordering::Release);
                let _ = done_tx.send(result);
            })
            .expect("failed to spawn motion worker");

        *self.nav_worker.lock() = Some(worker);
        Ok(NavHandle { rx: done_rx })
    }

    /// Cancel any in-flight navigation and stop the motors.
    ///
    /// Idempotent and always safe; the motion worker observes the cancel
    /// flag at least once per control iteration and returns `Cancelled`.
    pub fn stop(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        if let Err(e) = self.link.send_motor_stop() {
            log::error!("stop: failed to issue zero-speed command: {}", e);
        }
    }
}

impl Drop for Navigator {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.cancel.store(true, Ordering::Release);
        if let Some(worker) = self.nav_worker.lock().take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.loc_worker.take() {
            let _ = worker.join();
        }
    }
}

/// Everything the motion worker needs, owned.
struct MotionContext {
    link: Arc<McuLink>,
    inflated: Arc<OccupancyMap>,
    shared: Arc<NavShared>,
    latest_scan: Arc<Mutex<Option<LaserScan>>>,
    config: NavigatorConfig,
    goal: Point2D,
}

/// Localization thread body.
///
/// Odometry deltas are applied in receipt order before each measurement
/// update; updates may be skipped under load but never reordered.
fn localization_loop(
    telemetry: Receiver<Telemetry>,
    mut scan_source: Box<dyn ScanSource>,
    map: Arc<OccupancyMap>,
    shared: Arc<NavShared>,
    latest_scan: Arc<Mutex<Option<LaserScan>>>,
    start: Pose2D,
    config: NavigatorConfig,
) {
    let mut tracker = TickTracker::new();
    let mut odometry = OdometryIntegrator::new(config.odometry.clone(), start);
    let mut localizer = Localizer::new(config.localizer.clone(), start);
    let period = Duration::from_secs_f32(1.0 / config.localization_rate_hz);

    while !shared.shutdown.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        // Motion updates, strictly in receipt order.
        while let Ok(message) = telemetry.try_recv() {
            match message {
                Telemetry::Encoder { left, right } => {
                    if let Some(delta) = tracker.update(left, right, Instant::now()) {
                        let motion = odometry.apply(&delta);
                        localizer.predict(motion.ds, motion.dtheta);
                    }
                }
                Telemetry::Ir(raw) => {
                    shared
                        .ir_distance
                        .store(raw * config.ir_scale_m, Ordering::Release);
                }
                Telemetry::Ack | Telemetry::Error(_) => {}
            }
        }

        // Measurement update from a fresh revolution.
        if let Some(scan) = scan_source.latest_scan() {
            match localizer.update(&scan, &map) {
                Ok(()) => {}
                Err(NavError::LocalizationFailure { std_dev }) => {
                    log::error!("localization failure declared (std dev {:.2}m)", std_dev);
                    shared.localization_std_dev.store(std_dev, Ordering::Release);
                    shared.localization_failed.store(true, Ordering::Release);
                }
                Err(e) => log::error!("unexpected localizer error: {}", e),
            }
            *latest_scan.lock() = Some(scan);
        }

        shared.pose.store(localizer.estimate(), Ordering::Release);

        let elapsed = tick_start.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }
}

/// Motion worker body: plan, follow, supervise.
fn follow_goal(ctx: &MotionContext) -> Result<(), NavError> {
    let planner = AStarPlanner::new(ctx.config.planner.clone());
    let mut drive = DriveController::new(ctx.config.drive.clone());

    let start_pose = ctx.shared.pose.load(Ordering::Acquire);
    log::info!(
        "navigating from ({:.2}, {:.2}) to ({:.2}, {:.2})",
        start_pose.x,
        start_pose.y,
        ctx.goal.x,
        ctx.goal.y
    );

    let mut path = plan_with_overlay(ctx, &planner, start_pose.position())?;
    log::info!("path found: {} waypoints, {:.2}m", path.len(), path.total_length());

    let mut waypoint_index = 0usize;
    let mut proximity_events = 0u32;
    let mut replans = 0u32;
    let mut best_goal_dist = f32::INFINITY;
    let mut last_progress = Instant::now();
    let period = Duration::from_secs_f32(1.0 / ctx.config.control_rate_hz);

    loop {
        let tick_start = Instant::now();

        if ctx.shared.cancel.load(Ordering::Acquire) {
            return Err(NavError::Cancelled);
        }
        if ctx.shared.localization_failed.load(Ordering::Acquire) {
            return Err(NavError::LocalizationFailure {
                std_dev: ctx.shared.localization_std_dev.load(Ordering::Acquire),
            });
        }

        let pose = ctx.shared.pose.load(Ordering::Acquire);
        let goal_dist = pose.distance_to(&ctx.goal);

        if goal_dist <= ctx.config.position_tolerance {
            log::info!("goal reached, {:.3}m off", goal_dist);
            return Ok(());
        }

        // Progress supervision
        if goal_dist + ctx.config.progress_epsilon < best_goal_dist {
            best_goal_dist = goal_dist;
            last_progress = Instant::now();
        } else {
            let stalled = last_progress.elapsed().as_secs_f32();
            if stalled > ctx.config.no_progress_timeout_secs {
                return Err(NavError::GoalUnreachable {
                    stalled_secs: stalled,
                });
            }
        }

        // IR proximity: stop, back away, replan.
        let ir = ctx.shared.ir_distance.load(Ordering::Acquire);
        if ir.is_finite() && ir < ctx.config.ir_stop_distance {
            proximity_events += 1;
            log::warn!(
                "IR proximity {:.2}m, emergency stop ({}/{})",
                ir,
                proximity_events,
                ctx.config.max_proximity_events
            );
            ctx.link.send_motor_stop()?;
            if proximity_events >= ctx.config.max_proximity_events {
                return Err(NavError::ObstacleCollision {
                    events: proximity_events,
                });
            }
            back_up(ctx)?;
            let pose = ctx.shared.pose.load(Ordering::Acquire);
            path = plan_with_overlay(ctx, &planner, pose.position())?;
            waypoint_index = 0;
            drive.reset();
            replans += 1;
            continue;
        }

        // Scan obstacle on the remaining path: replan from here.
        if replans < ctx.config.max_replans {
            let scan = ctx.latest_scan.lock().clone();
            if let Some(scan) = scan {
                if scan_blocks_path(
                    &scan,
                    &pose,
                    path.remaining(waypoint_index),
                    &ctx.config,
                ) {
                    log::warn!("obstacle near remaining path, replanning");
                    path = plan_with_overlay(ctx, &planner, pose.position())?;
                    waypoint_index = 0;
                    drive.reset();
                    replans += 1;
                    continue;
                }
            }
        }

        // Advance past reached waypoints. A waypoint also counts as passed
        // once its successor is closer, so a near miss never orbits.
        while waypoint_index < path.len() {
            let waypoint = path.waypoints()[waypoint_index];
            let here = pose.distance_to(&waypoint.position());
            if here <= waypoint.tolerance {
                waypoint_index += 1;
                continue;
            }
            if let Some(next) = path.waypoints().get(waypoint_index + 1) {
                if pose.distance_to(&next.position()) < here {
                    waypoint_index += 1;
                    continue;
                }
            }
            break;
        }

        let target = if waypoint_index < path.len() {
            path.waypoints()[waypoint_index]
        } else {
            // Past the last waypoint but outside the goal tolerance: home
            // in on the goal directly.
            Waypoint::with_tolerance(ctx.goal.x, ctx.goal.y, ctx.config.position_tolerance)
        };

        let command = drive.steer(&pose, &target, period.as_secs_f32());
        ctx.link.send(&command.to_wire())?;

        let elapsed = tick_start.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }
}

/// Plan on the inflated map with lidar obstacles stamped in.
fn plan_with_overlay(
    ctx: &MotionContext,
    planner: &AStarPlanner,
    from: Point2D,
) -> Result<Path, NavError> {
    let pose = ctx.shared.pose.load(Ordering::Acquire);
    let obstacles = {
        let scan = ctx.latest_scan.lock();
        scan.as_ref()
            .map(|scan| dynamic_obstacles(scan, &pose, ctx.config.dynamic_obstacle_range))
            .unwrap_or_default()
    };

    if obstacles.is_empty() {
        planner.plan(&ctx.inflated, from, ctx.goal)
    } else {
        let overlay = ctx
            .inflated
            .with_obstacles(&obstacles, ctx.config.obstacle_clearance);
        planner.plan(&overlay, from, ctx.goal)
    }
}

/// World positions of nearby scan returns; far returns are not obstacles.
fn dynamic_obstacles(scan: &LaserScan, pose: &Pose2D, max_range: f32) -> Vec<Point2D> {
    scan.points()
        .iter()
        .filter(|p| p.distance < max_range)
        .map(|p| {
            let (lx, ly) = p.to_cartesian();
            pose.transform(lx, ly)
        })
        .collect()
}

/// True when any nearby scan return is within the trigger radius of a
/// remaining waypoint.
fn scan_blocks_path(
    scan: &LaserScan,
    pose: &Pose2D,
    remaining: &[Waypoint],
    config: &NavigatorConfig,
) -> bool {
    if remaining.is_empty() {
        return false;
    }
    let radius_sq = config.scan_obstacle_radius * config.scan_obstacle_radius;

    for point in scan.points() {
        if point.distance >= config.dynamic_obstacle_range {
            continue;
        }
        let (lx, ly) = point.to_cartesian();
        let world = pose.transform(lx, ly);
        for waypoint in remaining {
            if world.distance_squared(&waypoint.position()) < radius_sq {
                return true;
            }
        }
    }

    false
}

/// Reverse a fixed distance, observing the cancel flag.
fn back_up(ctx: &MotionContext) -> Result<(), NavError> {
    let duration =
        Duration::from_secs_f32(ctx.config.backup_distance / ctx.config.backup_speed_mps);
    log::info!("backing up {:.2}m", ctx.config.backup_distance);

    ctx.link.send_motor(
        ctx.config.backup_speed,
        ctx.config.backup_speed,
        false,
        false,
    )?;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if ctx.shared.cancel.load(Ordering::Acquire) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    ctx.link.send_motor_stop()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doota_io::ScanPoint;

    #[test]
    fn test_scan_blocks_path_detects_near_obstacle() {
        let config = NavigatorConfig::default();
        let pose = Pose2D::home();
        // Obstacle 1m straight ahead.
        let scan = LaserScan::from_points(vec![
            ScanPoint::new(1.0, 0.0, 200),
            ScanPoint::new(1.0, 0.02, 200),
        ]);

        let on_path = vec![Waypoint::new(1.0, 0.0), Waypoint::new(2.0, 0.0)];
        assert!(scan_blocks_path(&scan, &pose, &on_path, &config));

        let clear = vec![Waypoint::new(0.0, 2.0)];
        assert!(!scan_blocks_path(&scan, &pose, &clear, &config));
    }

    #[test]
    fn test_far_returns_are_not_obstacles() {
        let config = NavigatorConfig::default();
        let pose = Pose2D::home();
        // A max-range return along the path means free space, not a wall.
        let scan = LaserScan::from_points(vec![ScanPoint::new(9.9, 0.0, 10)]);

        let path = vec![Waypoint::new(9.9, 0.0)];
        assert!(!scan_blocks_path(&scan, &pose, &path, &config));
    }

    #[test]
    fn test_dynamic_obstacles_transform_to_world() {
        let pose = Pose2D::new(1.0, 1.0, std::f32::consts::FRAC_PI_2);
        let scan = LaserScan::from_points(vec![ScanPoint::new(1.0, 0.0, 200)]);

        let obstacles = dynamic_obstacles(&scan, &pose, 2.5);
        assert_eq!(obstacles.len(), 1);
        assert!((obstacles[0].x - 1.0).abs() < 1e-5);
        assert!((obstacles[0].y - 2.0).abs() < 1e-5);
    }
}

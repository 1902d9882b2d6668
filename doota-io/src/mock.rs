//! Simulated microcontroller for hardware-free testing
//!
//! [`MockMcu`] sits on the device side of a [`MockTransport`] pair and
//! behaves like the firmware: it acknowledges every well-formed command,
//! integrates motor commands through a small differential-drive physics
//! step, and emits `ENCODER:` and `IR:` telemetry at the real firmware's
//! rates (sped up by the configured time scale for tests).

use crate::scan::LaserScan;
use crate::transport::MockTransport;
use crate::wire::LineReader;

use parking_lot::Mutex;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Physical and timing parameters of the simulated robot.
#[derive(Debug, Clone)]
pub struct MockMcuConfig {
    /// Distance between wheel centers (m).
    pub wheel_base: f32,
    /// Wheel radius (m).
    pub wheel_radius: f32,
    /// Encoder ticks per wheel revolution.
    pub ticks_per_rev: f32,
    /// Linear speed at full motor command 255 (m/s).
    pub full_speed: f32,
    /// Encoder telemetry period.
    pub encoder_period: Duration,
    /// IR telemetry period.
    pub ir_period: Duration,
    /// Simulation speed multiplier; 1.0 is real time.
    pub time_scale: f32,
}

impl Default for MockMcuConfig {
    fn default() -> Self {
        Self {
            wheel_base: 0.30,
            wheel_radius: 0.05,
            ticks_per_rev: 1000.0,
            full_speed: 0.5,
            encoder_period: Duration::from_millis(100),
            ir_period: Duration::from_millis(200),
            time_scale: 1.0,
        }
    }
}

#[derive(Default)]
struct McuState {
    /// Ground-truth pose (x, y, theta).
    pose: (f32, f32, f32),
    /// Signed wheel velocities in m/s.
    wheel_vel: (f32, f32),
    /// Accumulated encoder ticks (fractional, emitted truncated).
    ticks: (f64, f64),
    /// Raw IR value reported to the host.
    ir_raw: f32,
    /// Last servo angle commanded.
    servo_angle: Option<u8>,
    /// LED patterns in the order they were commanded.
    led_history: Vec<String>,
    /// Motor command lines in the order they arrived.
    motor_history: Vec<String>,
}

/// Handle to the simulated microcontroller.
pub struct MockMcu {
    state: Arc<Mutex<McuState>>,
    silent: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MockMcu {
    /// Spawn the simulation on the device side of `device`.
    pub fn spawn(device: MockTransport, config: MockMcuConfig) -> Self {
        let state = Arc::new(Mutex::new(McuState {
            ir_raw: 100.0,
            ..Default::default()
        }));
        let silent = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let state = Arc::clone(&state);
            let silent = Arc::clone(&silent);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("mock-mcu".into())
                .spawn(move || run(device, config, state, silent, stop))
                .expect("failed to spawn mock mcu")
        };

        Self {
            state,
            silent,
            stop,
            worker: Some(worker),
        }
    }

    /// Ground-truth pose of the simulated robot.
    pub fn ground_truth(&self) -> (f32, f32, f32) {
        self.state.lock().pose
    }

    /// Teleport the simulated robot.
    pub fn set_pose(&self, x: f32, y: f32, theta: f32) {
        self.state.lock().pose = (x, y, theta);
    }

    /// Set the raw IR value reported to the host.
    pub fn set_ir_raw(&self, raw: f32) {
        self.state.lock().ir_raw = raw;
    }

    /// Last servo angle the host commanded.
    pub fn servo_angle(&self) -> Option<u8> {
        self.state.lock().servo_angle
    }

    /// LED patterns commanded so far.
    pub fn led_history(&self) -> Vec<String> {
        self.state.lock().led_history.clone()
    }

    /// Motor command lines received so far.
    pub fn motor_history(&self) -> Vec<String> {
        self.state.lock().motor_history.clone()
    }

    /// Stop acknowledging and emitting, simulating a dead link.
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::Release);
    }
}

impl Drop for MockMcu {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(
    device: MockTransport,
    config: MockMcuConfig,
    state: Arc<Mutex<McuState>>,
    silent: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) {
    let mut lines = LineReader::new();
    let mut last_physics = Instant::now();
    let mut last_encoder = Instant::now();
    let mut last_ir = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let quiet = silent.load(Ordering::Acquire);

        // Commands from the host
        let written = device.take_written();
        if !written.is_empty() && !quiet {
            for line in lines.push(&written) {
                handle_command(&device, &state, &config, &line);
            }
        }

        // Physics integration
        let now = Instant::now();
        let dt = now.duration_since(last_physics).as_secs_f32() * config.time_scale;
        last_physics = now;
        integrate(&state, &config, dt);

        // Telemetry
        if !quiet {
            let scale = config.time_scale.max(1.0);
            if now.duration_since(last_encoder) >= config.encoder_period.div_f32(scale) {
                last_encoder = now;
                let (left, right) = {
                    let s = state.lock();
                    (s.ticks.0 as i64 as i32, s.ticks.1 as i64 as i32)
                };
                device.inject_read(format!("ENCODER:{},{}\n", left, right).as_bytes());
            }
            if now.duration_since(last_ir) >= config.ir_period.div_f32(scale) {
                last_ir = now;
                let raw = state.lock().ir_raw;
                device.inject_read(format!("IR:{}\n", raw).as_bytes());
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

fn handle_command(
    device: &MockTransport,
    state: &Arc<Mutex<McuState>>,
    config: &MockMcuConfig,
    line: &str,
) {
    let mut s = state.lock();
    let recognized = if let Some(rest) = line.strip_prefix("MOTOR:") {
        let fields: Vec<i32> = rest.split(',').filter_map(|f| f.trim().parse().ok()).collect();
        match fields.as_slice() {
            [ls, rs, ld, rd]
                if (0..=255).contains(ls)
                    && (0..=255).contains(rs)
                    && (0..=1).contains(ld)
                    && (0..=1).contains(rd) =>
            {
                let dir = |d: i32| if d == 1 { 1.0 } else { -1.0 };
                s.wheel_vel = (
                    *ls as f32 / 255.0 * config.full_speed * dir(*ld),
                    *rs as f32 / 255.0 * config.full_speed * dir(*rd),
                );
                s.motor_history.push(line.to_string());
                true
            }
            _ => false,
        }
    } else if let Some(rest) = line.strip_prefix("SERVO:") {
        match rest.trim().parse::<u8>() {
            Ok(angle) if angle <= 180 => {
                s.servo_angle = Some(angle);
                true
            }
            _ => false,
        }
    } else if let Some(rest) = line.strip_prefix("LED:") {
        s.led_history.push(rest.to_string());
        true
    } else if line == "STOP" {
        s.wheel_vel = (0.0, 0.0);
        s.motor_history.push(line.to_string());
        true
    } else {
        false
    };
    drop(s);

    if recognized {
        device.inject_read(b"ACK\n");
    } else {
        device.inject_read(format!("ERROR:{}\n", line).as_bytes());
    }
}

/// Differential-drive step: advance pose and encoder ticks by `dt`.
fn integrate(state: &Arc<Mutex<McuState>>, config: &MockMcuConfig, dt: f32) {
    let mut s = state.lock();
    let (vl, vr) = s.wheel_vel;
    if vl == 0.0 && vr == 0.0 {
        return;
    }

    let dl = vl * dt;
    let dr = vr * dt;
    let ds = (dl + dr) / 2.0;
    let dtheta = (dr - dl) / config.wheel_base;

    let (x, y, theta) = s.pose;
    let heading = theta + dtheta / 2.0;
    let mut new_theta = theta + dtheta;
    while new_theta > PI {
        new_theta -= 2.0 * PI;
    }
    while new_theta <= -PI {
        new_theta += 2.0 * PI;
    }
    s.pose = (x + ds * heading.cos(), y + ds * heading.sin(), new_theta);

    let ticks_per_m = config.ticks_per_rev as f64 / (2.0 * std::f64::consts::PI * config.wheel_radius as f64);
    s.ticks.0 += dl as f64 * ticks_per_m;
    s.ticks.1 += dr as f64 * ticks_per_m;
}

/// Person source whose detection is set by the test.
#[derive(Clone, Default)]
pub struct SharedPerson {
    slot: Arc<Mutex<Option<(f32, f32)>>>,
}

impl SharedPerson {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place (or remove) the person, robot-frame (x forward, y left).
    pub fn set(&self, position: Option<(f32, f32)>) {
        *self.slot.lock() = position;
    }
}

impl crate::lidar::PersonSource for SharedPerson {
    fn detect_person(&mut self) -> Option<(f32, f32)> {
        *self.slot.lock()
    }
}

/// Scan source backed by a closure, for simulator-generated scans.
pub struct FnScanSource<F>(pub F);

impl<F> crate::lidar::ScanSource for FnScanSource<F>
where
    F: FnMut() -> Option<LaserScan> + Send,
{
    fn latest_scan(&mut self) -> Option<LaserScan> {
        (self.0)()
    }
}

/// Scan source handing out each scan placed in it exactly once.
#[derive(Clone, Default)]
pub struct SharedScan {
    slot: Arc<Mutex<Option<LaserScan>>>,
}

impl SharedScan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scan: Option<LaserScan>) {
        *self.slot.lock() = scan;
    }
}

impl crate::lidar::ScanSource for SharedScan {
    fn latest_scan(&mut self) -> Option<LaserScan> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkConfig, McuLink};

    fn fast_link() -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(10),
            max_attempts: 3,
        }
    }

    #[test]
    fn test_mock_mcu_acks_and_moves() {
        let device = MockTransport::new();
        let mcu = MockMcu::spawn(
            device.clone(),
            MockMcuConfig {
                time_scale: 20.0,
                ..Default::default()
            },
        );
        let link = McuLink::new(Box::new(device), fast_link());

        link.send_motor(255, 255, true, true).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        link.send_motor_stop().unwrap();

        let (x, y, _) = mcu.ground_truth();
        assert!(x > 0.05, "robot should have driven forward, x={}", x);
        assert!(y.abs() < 0.01);
    }

    #[test]
    fn test_mock_mcu_emits_encoder_telemetry() {
        let device = MockTransport::new();
        let _mcu = MockMcu::spawn(
            device.clone(),
            MockMcuConfig {
                time_scale: 10.0,
                ..Default::default()
            },
        );
        let link = McuLink::new(Box::new(device), fast_link());
        let telemetry = link.telemetry();

        let mut saw_encoder = false;
        let mut saw_ir = false;
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline && !(saw_encoder && saw_ir) {
            match telemetry.recv_timeout(Duration::from_millis(100)) {
                Ok(crate::wire::Telemetry::Encoder { .. }) => saw_encoder = true,
                Ok(crate::wire::Telemetry::Ir(_)) => saw_ir = true,
                _ => {}
            }
        }
        assert!(saw_encoder && saw_ir);
    }

    #[test]
    fn test_silent_mcu_drops_link() {
        let device = MockTransport::new();
        let mcu = MockMcu::spawn(device.clone(), MockMcuConfig::default());
        let link = McuLink::new(Box::new(device), fast_link());

        link.send_motor(100, 100, true, true).unwrap();
        mcu.go_silent();

        let result = link.send_motor(100, 100, true, true);
        assert!(matches!(result, Err(crate::error::Error::LinkLost { .. })));
    }

    #[test]
    fn test_malformed_command_rejected() {
        let device = MockTransport::new();
        let _mcu = MockMcu::spawn(device.clone(), MockMcuConfig::default());

        // Bypass the typed API to exercise the firmware's ERROR path.
        device.inject_read(b"");
        let link = McuLink::new(Box::new(device.clone()), fast_link());
        link.send_motor(10, 10, true, true).unwrap();

        let history = _mcu.motor_history();
        assert_eq!(history, vec!["MOTOR:10,10,1,1"]);
    }
}

//! End-to-end delivery scenarios against simulated hardware.
//!
//! The rig is a 10x10 m empty square map with home at the (0, 0) corner
//! and the warehouse at (5, 3). The microcontroller is simulated by
//! `MockMcu` (sped up 4x), the person detector and QR scanner are
//! scripted, and the order directory is an in-memory table holding order
//! 42 with secret key "abc".

use doota_ctrl::audio::{AudioClip, RecordingSink};
use doota_ctrl::box_actuator::{BoxActuator, BoxConfig};
use doota_ctrl::config::StateTimeouts;
use doota_ctrl::confirm::SharedConfirm;
use doota_ctrl::delivery::{DeliveryMachine, DeliveryParams, State, Subsystems};
use doota_ctrl::orders::{InMemoryOrders, OrderVerifier, QrSource, ScriptedQr};

use doota_io::lidar::{PersonSource, ScanSource};
use doota_io::link::LinkConfig;
use doota_io::mock::{MockMcu, MockMcuConfig};
use doota_io::transport::MockTransport;
use doota_io::{LaserScan, McuLink};
use doota_nav::localization::{LocalizerConfig, MotionNoise, ParticleFilterConfig, SensorModelConfig};
use doota_nav::map::MapFile;
use doota_nav::navigator::NavigatorConfig;
use doota_nav::{Navigator, Point2D, Pose2D};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const EMPTY_SQUARE: &str = r#"
resolution: 0.05
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles: []
"#;

const BLOCKED_WAREHOUSE: &str = r#"
resolution: 0.05
width: 10.0
height: 10.0
origin: [0.0, 0.0]
obstacles:
  - type: rectangle
    x: 4.0
    y: 2.0
    width: 2.0
    height: 2.0
"#;

/// Person detector that projects a scripted world-frame person into the
/// robot frame using the simulator's ground truth.
struct SimPerson {
    mcu: Arc<MockMcu>,
    person: Arc<Mutex<Option<Point2D>>>,
}

impl PersonSource for SimPerson {
    fn detect_person(&mut self) -> Option<(f32, f32)> {
        let target = (*self.person.lock())?;
        let (x, y, theta) = self.mcu.ground_truth();
        let dx = target.x - x;
        let dy = target.y - y;
        let (sin_t, cos_t) = theta.sin_cos();
        Some((cos_t * dx + sin_t * dy, -sin_t * dx + cos_t * dy))
    }
}

/// No laser revolutions in the rig; localization rides odometry.
struct NoScans;

impl ScanSource for NoScans {
    fn latest_scan(&mut self) -> Option<LaserScan> {
        None
    }
}

struct Rig {
    machine: DeliveryMachine,
    mcu: Arc<MockMcu>,
    person: Arc<Mutex<Option<Point2D>>>,
    audio: RecordingSink,
    qr: ScriptedQr,
    confirm: SharedConfirm,
}

fn nav_config() -> NavigatorConfig {
    NavigatorConfig {
        control_rate_hz: 50.0,
        localization_rate_hz: 25.0,
        localizer: LocalizerConfig {
            divergence_std_dev: 5.0,
            filter: ParticleFilterConfig {
                num_particles: 40,
                seed: 42,
                initial_spread_xy: 0.02,
                initial_spread_theta: 0.02,
                motion: MotionNoise {
                    trans_per_m: 0.02,
                    rot_per_rad: 0.02,
                    rot_per_m: 0.01,
                    lateral_per_m: 0.01,
                },
                sensor: SensorModelConfig {
                    beams: 4,
                    max_range: 3.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build_rig(map_yaml: &str) -> Rig {
    let device = MockTransport::new();
    let mcu = Arc::new(MockMcu::spawn(
        device.clone(),
        MockMcuConfig {
            time_scale: 4.0,
            ..Default::default()
        },
    ));

    let link = Arc::new(McuLink::new(
        Box::new(device),
        LinkConfig {
            ack_timeout: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(20),
            max_attempts: 3,
        },
    ));

    let map = MapFile::from_yaml_str(map_yaml).unwrap().build().unwrap();
    let navigator = Navigator::new(
        Arc::clone(&link),
        Box::new(NoScans),
        map,
        Pose2D::home(),
        nav_config(),
    );

    let person = Arc::new(Mutex::new(None));
    let persons = SimPerson {
        mcu: Arc::clone(&mcu),
        person: Arc::clone(&person),
    };

    let audio = RecordingSink::new();
    let qr = ScriptedQr::new();
    let confirm = SharedConfirm::new();

    let directory = InMemoryOrders::from_pairs([(42, "abc".to_string())]);
    let verifier = Arc::new(OrderVerifier::new(
        Box::new(directory),
        1,
        Duration::from_millis(10),
    ));

    let box_lid = BoxActuator::new(
        Arc::clone(&link),
        BoxConfig {
            ramp_deg_per_sec: 450.0,
            ..Default::default()
        },
    );

    let subsystems = Subsystems {
        navigator,
        link,
        box_lid,
        audio: Box::new(audio.clone()),
        persons: Box::new(persons),
        qr: Arc::new(Mutex::new(Box::new(qr.clone()) as Box<dyn QrSource>)),
        orders: verifier,
        confirm: Box::new(confirm.clone()),
    };

    let params = DeliveryParams {
        home: Point2D::new(0.0, 0.0),
        warehouse: Point2D::new(5.0, 3.0),
        delivery_zone_radius: 2.0,
        approach_distance: 0.5,
        approach_speed: 120,
        person_debounce: Duration::from_secs(2),
        delivery_hold: Duration::from_secs(10),
        qr_timeout: Duration::from_secs(30),
        max_recovery_attempts: 3,
        recovery_retry_delay: Duration::from_secs(2),
        timeouts: StateTimeouts::default(),
    };

    Rig {
        machine: DeliveryMachine::new(params, subsystems),
        mcu,
        person,
        audio,
        qr,
        confirm,
    }
}

const TICK: Duration = Duration::from_millis(20);

/// Tick the machine until it reaches `target`, or panic after `timeout`.
fn run_until(rig: &mut Rig, target: State, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        rig.machine.tick();
        if rig.machine.state() == target {
            return;
        }
        std::thread::sleep(TICK);
    }
    panic!(
        "never reached {:?}; stuck in {:?} (transitions: {:?})",
        target,
        rig.machine.state(),
        rig.machine
            .transitions()
            .iter()
            .map(|t| t.to)
            .collect::<Vec<_>>()
    );
}

/// Keep ticking for a fixed duration, asserting the state never changes.
fn hold_state(rig: &mut Rig, expected: State, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        rig.machine.tick();
        assert_eq!(rig.machine.state(), expected);
        std::thread::sleep(TICK);
    }
}

fn visited_states(rig: &Rig) -> Vec<State> {
    rig.machine.transitions().iter().map(|t| t.to).collect()
}

#[test]
fn happy_path_full_delivery_cycle() {
    let mut rig = build_rig(EMPTY_SQUARE);
    rig.machine.start();

    // A customer shows up at (1.5, 0.5) with a valid order.
    rig.person.lock().replace(Point2D::new(1.5, 0.5));
    rig.qr
        .present(br#"{"order_id": 42, "secret_key": "abc"}"#.to_vec());

    run_until(&mut rig, State::Approaching, Duration::from_secs(5));
    run_until(&mut rig, State::Verifying, Duration::from_secs(20));
    run_until(&mut rig, State::NavigatingToWarehouse, Duration::from_secs(10));
    run_until(&mut rig, State::Loading, Duration::from_secs(60));

    // Operator loads the package and confirms.
    std::thread::sleep(Duration::from_millis(300));
    rig.confirm.confirm();

    run_until(&mut rig, State::ReturningToCustomer, Duration::from_secs(10));
    run_until(&mut rig, State::Delivering, Duration::from_secs(60));
    run_until(&mut rig, State::Resetting, Duration::from_secs(20));
    run_until(&mut rig, State::Waiting, Duration::from_secs(60));

    // Full state sequence, in order.
    assert_eq!(
        visited_states(&rig),
        vec![
            State::Waiting,
            State::Approaching,
            State::Verifying,
            State::NavigatingToWarehouse,
            State::Loading,
            State::ReturningToCustomer,
            State::Delivering,
            State::Resetting,
            State::Waiting,
        ]
    );

    // Final pose back at home.
    let pose = rig.machine.context().pose;
    let home_dist = (pose.x * pose.x + pose.y * pose.y).sqrt();
    assert!(home_dist <= 0.12, "final pose {:.2}m from home", home_dist);

    // Audio trace.
    let trace = rig.audio.trace();
    for expected in [
        AudioClip::RequestQr,
        AudioClip::OrderAccepted,
        AudioClip::OrderNumber(42),
        AudioClip::DeliveryGreeting,
    ] {
        assert!(trace.contains(&expected), "missing {:?} in {:?}", expected, trace);
    }

    // The box opened for exactly the delivery window: Delivering lasted
    // 10s give or take one tick.
    let records = rig.machine.transitions();
    let delivering_at = records
        .iter()
        .find(|t| t.to == State::Delivering)
        .unwrap()
        .at;
    let resetting_at = records
        .iter()
        .find(|t| t.to == State::Resetting)
        .unwrap()
        .at;
    let held = resetting_at.duration_since(delivering_at).as_secs_f32();
    assert!((held - 10.0).abs() <= 0.2, "delivery window was {:.2}s", held);

    // Every completed navigation ended with a zero-speed motor command.
    let history = rig.mcu.motor_history();
    let last = history.last().expect("motor commands were sent");
    assert!(
        last == "STOP" || last == "MOTOR:0,0,0,0",
        "last motor command was {:?}",
        last
    );

    // Context cleared back in Waiting.
    assert!(rig.machine.context().customer_pose.is_none());
    assert!(rig.machine.context().order_id.is_none());
}

#[test]
fn rejected_order_returns_to_waiting() {
    let mut rig = build_rig(EMPTY_SQUARE);
    rig.machine.start();

    rig.person.lock().replace(Point2D::new(1.5, 0.5));
    rig.qr
        .present(br#"{"order_id": 42, "secret_key": "wrong"}"#.to_vec());

    run_until(&mut rig, State::Verifying, Duration::from_secs(20));
    let verification_pose = rig.mcu.ground_truth();

    // Remove the person so Waiting does not immediately re-approach.
    rig.person.lock().take();
    run_until(&mut rig, State::Waiting, Duration::from_secs(10));

    assert_eq!(
        visited_states(&rig),
        vec![
            State::Waiting,
            State::Approaching,
            State::Verifying,
            State::Waiting,
        ]
    );
    assert!(rig.audio.contains(AudioClip::OrderRejected));
    assert!(!rig.audio.contains(AudioClip::OrderAccepted));

    // The robot has not wandered off its verification spot.
    hold_state(&mut rig, State::Waiting, Duration::from_millis(500));
    let (x, y, _) = rig.mcu.ground_truth();
    let moved =
        ((x - verification_pose.0).powi(2) + (y - verification_pose.1).powi(2)).sqrt();
    assert!(moved <= 0.10, "robot moved {:.2}m after rejection", moved);
}

#[test]
fn customer_walks_away_during_approach() {
    let mut rig = build_rig(EMPTY_SQUARE);
    rig.machine.start();

    rig.person.lock().replace(Point2D::new(1.8, 0.2));
    run_until(&mut rig, State::Approaching, Duration::from_secs(5));

    // Let the robot chase for a moment, then the customer disappears.
    std::thread::sleep(Duration::from_millis(400));
    rig.machine.tick();
    rig.person.lock().take();

    run_until(&mut rig, State::Waiting, Duration::from_secs(5));

    assert_eq!(
        visited_states(&rig),
        vec![State::Waiting, State::Approaching, State::Waiting]
    );

    // Zero-speed was issued on the way out of Approaching.
    let history = rig.mcu.motor_history();
    let last = history.last().expect("motor commands were sent");
    assert!(
        last == "STOP" || last == "MOTOR:0,0,0,0",
        "last motor command was {:?}",
        last
    );
}

#[test]
fn blocked_warehouse_recovers_to_waiting() {
    let mut rig = build_rig(BLOCKED_WAREHOUSE);
    rig.machine.start();

    rig.person.lock().replace(Point2D::new(1.5, 0.5));
    rig.qr
        .present(br#"{"order_id": 42, "secret_key": "abc"}"#.to_vec());

    run_until(&mut rig, State::NavigatingToWarehouse, Duration::from_secs(30));

    // The person must not distract the recovery drive home.
    rig.person.lock().take();

    run_until(&mut rig, State::ErrorRecovery, Duration::from_secs(30));
    run_until(&mut rig, State::Waiting, Duration::from_secs(60));

    let states = visited_states(&rig);
    assert!(states.contains(&State::ErrorRecovery));
    assert!(!states.contains(&State::Loading));

    // Box stayed closed, error audio played.
    assert!(!rig.machine.subsystems().box_lid.is_open());
    assert!(rig.audio.contains(AudioClip::Error));
}

#[test]
fn dead_serial_link_freezes_in_emergency_stop() {
    let mut rig = build_rig(EMPTY_SQUARE);
    rig.machine.start();

    rig.person.lock().replace(Point2D::new(1.8, 0.3));
    run_until(&mut rig, State::Approaching, Duration::from_secs(5));

    // The microcontroller dies mid-approach.
    rig.mcu.go_silent();

    run_until(&mut rig, State::EmergencyStop, Duration::from_secs(30));

    let states = visited_states(&rig);
    assert_eq!(states.last(), Some(&State::EmergencyStop));
    assert!(!states.contains(&State::Verifying));

    // Frozen: further ticks change nothing.
    hold_state(&mut rig, State::EmergencyStop, Duration::from_millis(300));
}

#[test]
fn transition_log_is_ordered_and_reasoned() {
    let mut rig = build_rig(EMPTY_SQUARE);
    rig.machine.start();

    rig.person.lock().replace(Point2D::new(1.5, 0.5));
    run_until(&mut rig, State::Approaching, Duration::from_secs(5));

    let records = rig.machine.transitions();
    assert!(records.len() >= 2);

    // Timestamps are monotonic and every record carries a reason.
    for pair in records.windows(2) {
        assert!(pair[1].at >= pair[0].at);
        // Chained: the next record starts where the previous ended.
        assert_eq!(pair[1].from, pair[0].to);
    }
    for record in records {
        assert!(!record.reason.is_empty());
    }
}

//! Doota delivery robot - control process entry point
//!
//! Wires up the serial link, lidar, navigator and delivery state machine,
//! then runs the 10 Hz tick loop until shutdown. Exit status: 0 on a clean
//! shutdown, 1 on startup failures (bad config, malformed map, dead
//! serial port), 2 when the machine froze in emergency stop.

use doota_ctrl::audio::WavPlayer;
use doota_ctrl::box_actuator::{BoxActuator, BoxConfig};
use doota_ctrl::confirm::StdinConfirm;
use doota_ctrl::delivery::{DeliveryMachine, DeliveryParams, State, Subsystems};
use doota_ctrl::orders::{FileQr, InMemoryOrders, OrderVerifier};
use doota_ctrl::CtrlConfig;

use doota_io::lidar::{LidarConfig, LidarScanner, PersonSource, ScanSource, SharedLidar};
use doota_io::link::LinkConfig;
use doota_io::transport::SerialTransport;
use doota_io::McuLink;
use doota_nav::map::MapFile;
use doota_nav::{Navigator, Pose2D};

use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("doota_ctrl=info".parse().expect("valid directive")),
        )
        .init();

    // A single optional argument names the config file.
    let args: Vec<String> = std::env::args().collect();
    let config = if args.len() > 1 {
        let path = Path::new(&args[1]);
        info!("loading configuration from {:?}", path);
        match CtrlConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("configuration error: {}", e);
                return 1;
            }
        }
    } else if Path::new("doota.toml").exists() {
        info!("loading configuration from doota.toml");
        match CtrlConfig::load(Path::new("doota.toml")) {
            Ok(config) => config,
            Err(e) => {
                error!("configuration error: {}", e);
                return 1;
            }
        }
    } else {
        info!("using default configuration");
        CtrlConfig::default()
    };

    // Map first: a malformed map means no safe operation at all.
    let map = match MapFile::load(&config.paths.map).and_then(|file| file.build()) {
        Ok(map) => map,
        Err(e) => {
            error!("map error: {}", e);
            return 1;
        }
    };

    // Microcontroller link
    let link = match SerialTransport::open(&config.devices.mcu_port, config.devices.mcu_baud) {
        Ok(transport) => Arc::new(McuLink::new(Box::new(transport), LinkConfig::default())),
        Err(e) => {
            error!(
                "failed to open microcontroller port {}: {}",
                config.devices.mcu_port, e
            );
            return 1;
        }
    };

    // Lidar; the robot degrades to a blind waiter without it.
    let (scan_source, person_source): (Box<dyn ScanSource>, Box<dyn PersonSource>) =
        match SerialTransport::open(&config.devices.lidar_port, config.devices.lidar_baud) {
            Ok(transport) => {
                let scanner =
                    SharedLidar::new(LidarScanner::new(Box::new(transport), LidarConfig::default()));
                (Box::new(scanner.clone()), Box::new(scanner))
            }
            Err(e) => {
                warn!(
                    "lidar unavailable ({}), running without person detection",
                    e
                );
                (Box::new(NoLidar), Box::new(NoLidar))
            }
        };

    // Order directory: bundled TOML table behind the external-lookup trait.
    let orders = match load_orders(&config.paths.orders) {
        Ok(orders) => orders,
        Err(e) => {
            warn!("order table unavailable ({}), all orders will be rejected", e);
            InMemoryOrders::new()
        }
    };
    let verifier = Arc::new(OrderVerifier::new(
        Box::new(orders),
        config.delivery.order_lookup_attempts,
        Duration::from_millis(200),
    ));

    let navigator = Navigator::new(
        Arc::clone(&link),
        scan_source,
        map,
        Pose2D::home(),
        config.navigator_config(),
    );

    let box_lid = BoxActuator::new(Arc::clone(&link), BoxConfig::default());
    // Start from a known-closed lid.
    match box_lid.close().wait(Duration::from_secs(10)) {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("failed to close box at startup: {}", e);
            return 1;
        }
        None => {
            error!("box did not reach the closed position at startup");
            return 1;
        }
    }

    let subsystems = Subsystems {
        navigator,
        link: Arc::clone(&link),
        box_lid,
        audio: Box::new(WavPlayer::new(&config.paths.audio_dir)),
        persons: person_source,
        qr: Arc::new(Mutex::new(Box::new(FileQr::new(&config.devices.qr_spool)))),
        orders: verifier,
        confirm: Box::new(StdinConfirm),
    };

    let params = DeliveryParams::from_config(&config);
    let mut machine = DeliveryMachine::new(params, subsystems);

    // Graceful shutdown on SIGINT/SIGTERM
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            warn!("failed to register signal handler: {}", e);
        }
    }

    info!(
        "doota-ctrl v{} up: home ({:.1}, {:.1}), warehouse ({:.1}, {:.1})",
        env!("CARGO_PKG_VERSION"),
        config.zones.home[0],
        config.zones.home[1],
        config.zones.warehouse[0],
        config.zones.warehouse[1]
    );

    machine.start();
    let tick_period = Duration::from_secs_f32(1.0 / config.delivery.tick_rate_hz);

    loop {
        let tick_start = Instant::now();

        if shutdown.load(Ordering::Acquire) {
            info!("shutdown requested");
            break;
        }

        machine.tick();

        if machine.state() == State::EmergencyStop {
            error!("frozen in emergency stop, exiting");
            return 2;
        }

        let elapsed = tick_start.elapsed();
        if elapsed > tick_period {
            warn!("tick overran: {:?} > {:?}", elapsed, tick_period);
        } else {
            std::thread::sleep(tick_period - elapsed);
        }
    }

    info!("doota-ctrl finished");
    0
}

/// Blind fallbacks when the lidar is absent.
struct NoLidar;

impl ScanSource for NoLidar {
    fn latest_scan(&mut self) -> Option<doota_io::LaserScan> {
        None
    }
}

impl PersonSource for NoLidar {
    fn detect_person(&mut self) -> Option<(f32, f32)> {
        None
    }
}

/// Load the bundled order table: `[orders]` mapping id -> secret key.
fn load_orders(path: &str) -> std::io::Result<InMemoryOrders> {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct OrderTable {
        #[serde(default)]
        orders: std::collections::HashMap<String, String>,
    }

    let content = std::fs::read_to_string(path)?;
    let table: OrderTable = toml::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let pairs = table.orders.into_iter().filter_map(|(id, key)| {
        id.parse::<u32>()
            .ok()
            .map(|order_id| (order_id, key))
    });
    Ok(InMemoryOrders::from_pairs(pairs))
}

//! Configuration loading for the delivery controller.

use crate::error::{CtrlError, Result};
use doota_nav::localization::{LocalizerConfig, MotionNoise, ParticleFilterConfig, SensorModelConfig};
use doota_nav::motion::{DriveConfig, PidGains};
use doota_nav::navigator::NavigatorConfig;
use doota_nav::odometry::OdometryConfig;
use doota_nav::planning::PlannerConfig;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct CtrlConfig {
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub zones: ZoneConfig,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub nav: NavConfig,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub timeouts: StateTimeouts,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Serial device paths and baud rates.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceConfig {
    /// Microcontroller serial port
    #[serde(default = "default_mcu_port")]
    pub mcu_port: String,

    /// Microcontroller baud rate (9600 8N1)
    #[serde(default = "default_mcu_baud")]
    pub mcu_baud: u32,

    /// Lidar serial port
    #[serde(default = "default_lidar_port")]
    pub lidar_port: String,

    /// Lidar baud rate
    #[serde(default = "default_lidar_baud")]
    pub lidar_baud: u32,

    /// Spool file the external QR decoder drops payloads into
    #[serde(default = "default_qr_spool")]
    pub qr_spool: String,
}

/// Delivery geography.
#[derive(Clone, Debug, Deserialize)]
pub struct ZoneConfig {
    /// Home position (the global frame origin)
    #[serde(default = "default_home")]
    pub home: [f32; 2],

    /// Warehouse loading station
    #[serde(default = "default_warehouse")]
    pub warehouse: [f32; 2],

    /// Customers are only acknowledged within this radius of home (m)
    #[serde(default = "default_zone_radius")]
    pub delivery_zone_radius: f32,

    /// Stop this close to the customer when approaching (m)
    #[serde(default = "default_approach_distance")]
    pub customer_approach_distance: f32,
}

/// Robot physical parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct RobotConfig {
    /// Distance between wheel centers (m)
    #[serde(default = "default_wheel_base")]
    pub wheel_base: f32,

    /// Wheel radius (m)
    #[serde(default = "default_wheel_radius")]
    pub wheel_radius: f32,

    /// Encoder ticks per wheel revolution
    #[serde(default = "default_ticks_per_rev")]
    pub ticks_per_rev: f32,

    /// Meters per raw IR unit (firmware reports centimetres)
    #[serde(default = "default_ir_scale")]
    pub ir_scale_m: f32,
}

/// Navigation tuning.
#[derive(Clone, Debug, Deserialize)]
pub struct NavConfig {
    /// Arrival tolerance on navigation goals (m)
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f32,

    /// Obstacle inflation radius for planning (m)
    #[serde(default = "default_obstacle_clearance")]
    pub obstacle_clearance: f32,

    /// Particle count for the localizer
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,

    /// Motion control rate (Hz)
    #[serde(default = "default_control_rate")]
    pub control_rate_hz: f32,

    /// Localization update rate (Hz)
    #[serde(default = "default_localization_rate")]
    pub localization_rate_hz: f32,

    /// Linear PID gains
    #[serde(default = "default_linear_gains")]
    pub pid_linear: PidGains,

    /// Angular PID gains
    #[serde(default = "default_angular_gains")]
    pub pid_angular: PidGains,

    /// Wire speed ceiling (0-255)
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,

    /// Wire speed floor while driving
    #[serde(default = "default_min_speed")]
    pub min_speed: f32,
}

/// Delivery orchestration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DeliverySettings {
    /// State machine tick rate (Hz)
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: f32,

    /// Wire speed while approaching a customer
    #[serde(default = "default_approach_speed")]
    pub approach_speed: u8,

    /// Ignore repeat person detections within this interval (s)
    #[serde(default = "default_person_debounce")]
    pub person_debounce_secs: f32,

    /// How long the box stays open at the customer (s)
    #[serde(default = "default_delivery_hold")]
    pub delivery_hold_secs: f32,

    /// QR capture window (s)
    #[serde(default = "default_qr_timeout")]
    pub qr_timeout_secs: f32,

    /// Order directory lookup attempts
    #[serde(default = "default_order_lookup_attempts")]
    pub order_lookup_attempts: u32,

    /// Recovery attempts before emergency stop
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Pause between recovery attempts (s)
    #[serde(default = "default_recovery_retry")]
    pub recovery_retry_secs: f32,
}

/// Per-state timeouts in seconds; `Waiting` has none.
#[derive(Clone, Debug, Deserialize)]
pub struct StateTimeouts {
    #[serde(default = "default_t_approaching")]
    pub approaching: f32,
    #[serde(default = "default_t_verifying")]
    pub verifying: f32,
    #[serde(default = "default_t_warehouse")]
    pub navigating_to_warehouse: f32,
    #[serde(default = "default_t_loading")]
    pub loading: f32,
    #[serde(default = "default_t_returning")]
    pub returning_to_customer: f32,
    #[serde(default = "default_t_delivering")]
    pub delivering: f32,
    #[serde(default = "default_t_resetting")]
    pub resetting: f32,
    #[serde(default = "default_t_recovery")]
    pub error_recovery: f32,
}

/// File locations.
#[derive(Clone, Debug, Deserialize)]
pub struct PathsConfig {
    /// Environment map (YAML)
    #[serde(default = "default_map_path")]
    pub map: String,

    /// Directory of named audio clips
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,

    /// Order table file for the bundled directory implementation
    #[serde(default = "default_orders_path")]
    pub orders: String,
}

// Default value functions
fn default_mcu_port() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_mcu_baud() -> u32 {
    9600
}
fn default_lidar_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_lidar_baud() -> u32 {
    230_400
}
fn default_qr_spool() -> String {
    "qr_payload.json".to_string()
}
fn default_home() -> [f32; 2] {
    [0.0, 0.0]
}
fn default_warehouse() -> [f32; 2] {
    [5.0, 3.0]
}
fn default_zone_radius() -> f32 {
    2.0
}
fn default_approach_distance() -> f32 {
    0.5
}
fn default_wheel_base() -> f32 {
    0.30
}
fn default_wheel_radius() -> f32 {
    0.05
}
fn default_ticks_per_rev() -> f32 {
    1000.0
}
fn default_ir_scale() -> f32 {
    0.01
}
fn default_position_tolerance() -> f32 {
    0.10
}
fn default_obstacle_clearance() -> f32 {
    0.30
}
fn default_particle_count() -> usize {
    100
}
fn default_control_rate() -> f32 {
    10.0
}
fn default_localization_rate() -> f32 {
    10.0
}
fn default_linear_gains() -> PidGains {
    PidGains::new(1.0, 0.0, 0.1)
}
fn default_angular_gains() -> PidGains {
    PidGains::new(1.2, 0.0, 0.15)
}
fn default_max_speed() -> f32 {
    200.0
}
fn default_min_speed() -> f32 {
    60.0
}
fn default_tick_rate() -> f32 {
    10.0
}
fn default_approach_speed() -> u8 {
    120
}
fn default_person_debounce() -> f32 {
    2.0
}
fn default_delivery_hold() -> f32 {
    10.0
}
fn default_qr_timeout() -> f32 {
    30.0
}
fn default_order_lookup_attempts() -> u32 {
    3
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_recovery_retry() -> f32 {
    2.0
}
fn default_t_approaching() -> f32 {
    60.0
}
fn default_t_verifying() -> f32 {
    30.0
}
fn default_t_warehouse() -> f32 {
    120.0
}
fn default_t_loading() -> f32 {
    60.0
}
fn default_t_returning() -> f32 {
    120.0
}
fn default_t_delivering() -> f32 {
    15.0
}
fn default_t_resetting() -> f32 {
    120.0
}
fn default_t_recovery() -> f32 {
    180.0
}
fn default_map_path() -> String {
    "map.yaml".to_string()
}
fn default_audio_dir() -> String {
    "assets/audio".to_string()
}
fn default_orders_path() -> String {
    "orders.toml".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mcu_port: default_mcu_port(),
            mcu_baud: default_mcu_baud(),
            lidar_port: default_lidar_port(),
            lidar_baud: default_lidar_baud(),
            qr_spool: default_qr_spool(),
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            warehouse: default_warehouse(),
            delivery_zone_radius: default_zone_radius(),
            customer_approach_distance: default_approach_distance(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            wheel_base: default_wheel_base(),
            wheel_radius: default_wheel_radius(),
            ticks_per_rev: default_ticks_per_rev(),
            ir_scale_m: default_ir_scale(),
        }
    }
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            position_tolerance: default_position_tolerance(),
            obstacle_clearance: default_obstacle_clearance(),
            particle_count: default_particle_count(),
            control_rate_hz: default_control_rate(),
            localization_rate_hz: default_localization_rate(),
            pid_linear: default_linear_gains(),
            pid_angular: default_angular_gains(),
            max_speed: default_max_speed(),
            min_speed: default_min_speed(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
            approach_speed: default_approach_speed(),
            person_debounce_secs: default_person_debounce(),
            delivery_hold_secs: default_delivery_hold(),
            qr_timeout_secs: default_qr_timeout(),
            order_lookup_attempts: default_order_lookup_attempts(),
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_retry_secs: default_recovery_retry(),
        }
    }
}

impl Default for StateTimeouts {
    fn default() -> Self {
        Self {
            approaching: default_t_approaching(),
            verifying: default_t_verifying(),
            navigating_to_warehouse: default_t_warehouse(),
            loading: default_t_loading(),
            returning_to_customer: default_t_returning(),
            delivering: default_t_delivering(),
            resetting: default_t_resetting(),
            error_recovery: default_t_recovery(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            map: default_map_path(),
            audio_dir: default_audio_dir(),
            orders: default_orders_path(),
        }
    }
}

impl CtrlConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CtrlError::Config(format!("failed to read config file: {}", e)))?;
        let config: CtrlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Assemble the navigator configuration from the flat sections.
    pub fn navigator_config(&self) -> NavigatorConfig {
        NavigatorConfig {
            position_tolerance: self.nav.position_tolerance,
            obstacle_clearance: self.nav.obstacle_clearance,
            ir_scale_m: self.robot.ir_scale_m,
            control_rate_hz: self.nav.control_rate_hz,
            localization_rate_hz: self.nav.localization_rate_hz,
            odometry: OdometryConfig {
                wheel_base: self.robot.wheel_base,
                wheel_radius: self.robot.wheel_radius,
                ticks_per_rev: self.robot.ticks_per_rev,
                ..OdometryConfig::default()
            },
            localizer: LocalizerConfig {
                filter: ParticleFilterConfig {
                    num_particles: self.nav.particle_count,
                    motion: MotionNoise::default(),
                    sensor: SensorModelConfig::default(),
                    ..ParticleFilterConfig::default()
                },
                ..LocalizerConfig::default()
            },
            planner: PlannerConfig::default(),
            drive: DriveConfig {
                max_speed: self.nav.max_speed,
                min_speed: self.nav.min_speed,
                linear: self.nav.pid_linear,
                angular: self.nav.pid_angular,
                ..DriveConfig::default()
            },
            ..NavigatorConfig::default()
        }
    }
}

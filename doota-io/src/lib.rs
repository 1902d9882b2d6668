//! DootaIO - Hardware abstraction for the Doota delivery robot
//!
//! This crate owns the two serial devices on the robot:
//!
//! - the microcontroller link ([`link::McuLink`]), an ASCII line protocol
//!   driving motors, the box servo and the eye LEDs, and streaming encoder
//!   and IR telemetry back
//! - the lidar ([`lidar::LidarScanner`]), a binary framed scanner producing
//!   360° range scans and a derived person-cluster detector
//!
//! ## Features
//!
//! - `mock`: Enable the simulated microcontroller for hardware-free testing

pub mod error;
pub mod lidar;
pub mod link;
pub mod scan;
pub mod transport;
pub mod wire;

#[cfg(feature = "mock")]
pub mod mock;

// Re-export commonly used types
pub use error::{Error, Result};
pub use link::McuLink;
pub use scan::{LaserScan, ScanPoint};
pub use wire::{Command, LedPattern, Telemetry};

//! DootaCtrl - delivery orchestration for the Doota indoor delivery robot
//!
//! The binary wires the hardware crates together and runs the 10 Hz tick
//! loop; everything the loop drives lives in this library so the
//! integration scenarios can exercise the full machine against simulated
//! hardware.

pub mod audio;
pub mod box_actuator;
pub mod completion;
pub mod config;
pub mod confirm;
pub mod delivery;
pub mod error;
pub mod orders;

pub use config::CtrlConfig;
pub use delivery::{DeliveryMachine, DeliveryParams, State, Subsystems};
pub use error::{CtrlError, Result};

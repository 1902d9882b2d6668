//! Error types for DootaIO
//!
//! # Recovery expectations
//!
//! - **`Serial` / `Io`**: port-level failures. A single failed read or write
//!   is retried by the link layer; a port that stays broken eventually
//!   surfaces as `LinkLost`.
//!
//! - **`AckTimeout`**: one command attempt went unacknowledged within the
//!   500 ms window. The link retries the command before escalating.
//!
//! - **`LinkLost`**: three consecutive attempts failed. There is no in-band
//!   recovery; the application must treat the robot as uncontrollable and
//!   stop.
//!
//! - **`Rejected`**: the microcontroller answered `ERROR:` for a command it
//!   could not parse. The firmware made no state change; this indicates a
//!   software bug on our side, not a hardware fault.
//!
//! - **`InvalidCommand`**: the command failed validation before it was ever
//!   written to the wire (e.g. a servo angle above 180°).

use thiserror::Error;

/// Errors that can occur in DootaIO
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command not acknowledged within {timeout_ms}ms: {command}")]
    AckTimeout { command: String, timeout_ms: u64 },

    #[error("Serial link lost (command {command} failed {attempts} attempts)")]
    LinkLost { command: String, attempts: u32 },

    #[error("Command rejected by microcontroller: {0}")]
    Rejected(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Link worker is not running")]
    LinkDown,
}

pub type Result<T> = std::result::Result<T, Error>;

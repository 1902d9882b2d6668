//! Error types for the delivery controller.

use thiserror::Error;

/// Controller error type.
#[derive(Error, Debug)]
pub enum CtrlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Map(#[from] doota_nav::map::MapError),

    #[error(transparent)]
    Nav(#[from] doota_nav::NavError),

    #[error(transparent)]
    Link(#[from] doota_io::Error),

    #[error("servo fault: {0}")]
    Servo(String),

    #[error("state {state} exceeded its {limit_secs:.0}s timeout")]
    StateTimeout { state: &'static str, limit_secs: f32 },

    #[error("{0}")]
    Internal(String),
}

impl From<toml::de::Error> for CtrlError {
    fn from(e: toml::de::Error) -> Self {
        CtrlError::Config(e.to_string())
    }
}

impl CtrlError {
    /// Errors with no recovery path; the machine freezes in EmergencyStop.
    pub fn is_fatal(&self) -> bool {
        match self {
            CtrlError::Nav(e) => e.is_fatal(),
            CtrlError::Link(doota_io::Error::LinkLost { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CtrlError>;

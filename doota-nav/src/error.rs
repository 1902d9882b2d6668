//! Error types for DootaNav

use thiserror::Error;

/// Navigation error taxonomy.
///
/// The delivery state machine classifies these centrally: localization and
/// link failures are fatal, everything else routes to error recovery.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("no path to goal")]
    PathNotFound,

    #[error("goal unreachable: no progress for {stalled_secs:.0}s")]
    GoalUnreachable { stalled_secs: f32 },

    #[error("obstacle collision: {events} proximity stops in one navigation")]
    ObstacleCollision { events: u32 },

    #[error("localization diverged (positional std dev {std_dev:.2}m)")]
    LocalizationFailure { std_dev: f32 },

    #[error("a navigation goal is already active")]
    Busy,

    #[error("navigation cancelled")]
    Cancelled,

    #[error(transparent)]
    Link(#[from] doota_io::Error),

    #[error(transparent)]
    Map(#[from] crate::map::MapError),
}

impl NavError {
    /// True for errors with no in-band recovery path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NavError::LocalizationFailure { .. }
                | NavError::Link(doota_io::Error::LinkLost { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, NavError>;

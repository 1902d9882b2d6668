//! Audio feedback
//!
//! The core never blocks on audio: clips are fire-and-forget, and a
//! missing clip degrades to a warning. Playback is delegated to the
//! system player so the control process stays free of codec concerns.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Highest order number with a recorded announcement clip.
pub const MAX_ORDER_CLIP: u32 = 100;

/// Logical audio clips the delivery flow plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioClip {
    RequestQr,
    OrderAccepted,
    OrderRejected,
    OrderNumber(u32),
    LoadingComplete,
    DeliveryGreeting,
    Error,
}

impl AudioClip {
    /// The clip's file stem in the audio directory.
    pub fn name(&self) -> String {
        match self {
            AudioClip::RequestQr => "request_qr".to_string(),
            AudioClip::OrderAccepted => "order_accepted".to_string(),
            AudioClip::OrderRejected => "order_rejected".to_string(),
            AudioClip::OrderNumber(n) => format!("order_number_{}", n),
            AudioClip::LoadingComplete => "loading_complete".to_string(),
            AudioClip::DeliveryGreeting => "delivery_greeting".to_string(),
            AudioClip::Error => "error".to_string(),
        }
    }
}

/// Fire-and-forget clip player.
pub trait AudioSink: Send {
    fn play(&self, clip: AudioClip);
}

/// Plays clips through the system player (`aplay`), detached.
pub struct WavPlayer {
    dir: PathBuf,
}

impl WavPlayer {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn clip_path(&self, clip: &AudioClip) -> Option<PathBuf> {
        if let AudioClip::OrderNumber(n) = clip {
            if *n == 0 || *n > MAX_ORDER_CLIP {
                return None;
            }
        }
        let path = self.dir.join(format!("{}.wav", clip.name()));
        path.exists().then_some(path)
    }
}

impl AudioSink for WavPlayer {
    fn play(&self, clip: AudioClip) {
        let Some(path) = self.clip_path(&clip) else {
            log::warn!("audio clip missing: {}", clip.name());
            return;
        };

        match std::process::Command::new("aplay")
            .arg(&path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            Ok(_) => log::debug!("playing {}", clip.name()),
            Err(e) => log::warn!("failed to play {}: {}", clip.name(), e),
        }
    }
}

/// Records the clip trace instead of playing, for tests.
#[derive(Clone, Default)]
pub struct RecordingSink {
    played: Arc<Mutex<Vec<AudioClip>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every clip played so far, in order.
    pub fn trace(&self) -> Vec<AudioClip> {
        self.played.lock().clone()
    }

    pub fn contains(&self, clip: AudioClip) -> bool {
        self.played.lock().contains(&clip)
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, clip: AudioClip) {
        self.played.lock().push(clip);
    }
}

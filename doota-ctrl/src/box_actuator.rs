//! Package box actuator
//!
//! The box lid rides on a servo. Opening and closing ramp through
//! intermediate angles at ~45°/s so a package is never thrown; the ramp
//! runs on a worker thread reporting through a completion value. The
//! tracked open/closed state follows the last *acknowledged* servo
//! command, not the last attempted one.

use crate::completion::{completion, Completion};
use crate::error::{CtrlError, Result};

use doota_io::McuLink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Servo angle at which the box counts as open.
pub const OPEN_THRESHOLD_DEG: u8 = 45;

/// Box geometry and ramp speed.
#[derive(Debug, Clone)]
pub struct BoxConfig {
    /// Fully open servo angle.
    pub open_angle: u8,
    /// Fully closed servo angle.
    pub close_angle: u8,
    /// Ramp rate (degrees per second).
    pub ramp_deg_per_sec: f32,
    /// Angle step per ramp command.
    pub ramp_step_deg: u8,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            open_angle: 90,
            close_angle: 0,
            ramp_deg_per_sec: 45.0,
            ramp_step_deg: 5,
        }
    }
}

/// Servo-driven box lid.
pub struct BoxActuator {
    link: Arc<McuLink>,
    config: BoxConfig,
    /// Last angle the firmware acknowledged.
    acked_angle: Arc<AtomicU8>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BoxActuator {
    pub fn new(link: Arc<McuLink>, config: BoxConfig) -> Self {
        let closed = config.close_angle;
        Self {
            link,
            config,
            acked_angle: Arc::new(AtomicU8::new(closed)),
            worker: Mutex::new(None),
        }
    }

    /// True iff the last acknowledged angle is at or past the threshold.
    pub fn is_open(&self) -> bool {
        self.acked_angle.load(Ordering::Acquire) >= OPEN_THRESHOLD_DEG
    }

    /// Last acknowledged servo angle.
    pub fn acked_angle(&self) -> u8 {
        self.acked_angle.load(Ordering::Acquire)
    }

    /// Ramp the lid open. Completes when the final angle is acknowledged.
    pub fn open(&self) -> Completion<Result<()>> {
        self.ramp_to(self.config.open_angle)
    }

    /// Ramp the lid closed.
    pub fn close(&self) -> Completion<Result<()>> {
        self.ramp_to(self.config.close_angle)
    }

    /// Slam the lid shut with a single un-ramped command.
    pub fn emergency_close(&self) -> Result<()> {
        log::warn!("emergency box close");
        send_with_one_retry(&self.link, self.config.close_angle)?;
        self.acked_angle
            .store(self.config.close_angle, Ordering::Release);
        Ok(())
    }

    fn ramp_to(&self, target: u8) -> Completion<Result<()>> {
        let (completer, handle) = completion();

        // Ramps are sequential; wait out any previous one first.
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        let link = Arc::clone(&self.link);
        let acked = Arc::clone(&self.acked_angle);
        let config = self.config.clone();

        let worker = std::thread::Builder::new()
            .name("box-ramp".into())
            .spawn(move || {
                let result = ramp(&link, &acked, &config, target);
                if let Err(ref e) = result {
                    log::error!("box ramp to {}° failed: {}", target, e);
                }
                completer.complete(result);
            })
            .expect("failed to spawn box worker");

        *self.worker.lock() = Some(worker);
        handle
    }
}

/// Step the servo from the acked angle to `target`.
fn ramp(
    link: &McuLink,
    acked: &AtomicU8,
    config: &BoxConfig,
    target: u8,
) -> Result<()> {
    let start = acked.load(Ordering::Acquire);
    if start == target {
        return Ok(());
    }

    let step = config.ramp_step_deg.max(1);
    let step_delay = Duration::from_secs_f32(step as f32 / config.ramp_deg_per_sec);

    let mut current = start;
    while current != target {
        current = if target > current {
            current.saturating_add(step).min(target)
        } else {
            current.saturating_sub(step).max(target)
        };

        send_with_one_retry(link, current)?;
        acked.store(current, Ordering::Release);

        if current != target {
            std::thread::sleep(step_delay);
        }
    }

    log::info!("box reached {}°", target);
    Ok(())
}

/// One retry on a failed servo command, then ServoFault.
fn send_with_one_retry(link: &McuLink, angle: u8) -> Result<()> {
    match link.send_servo(angle) {
        Ok(()) => Ok(()),
        Err(first) => {
            log::warn!("servo command {}° failed ({}), retrying once", angle, first);
            link.send_servo(angle)
                .map_err(|e| CtrlError::Servo(format!("angle {}°: {}", angle, e)))
        }
    }
}

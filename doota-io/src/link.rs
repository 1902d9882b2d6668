//! Microcontroller link
//!
//! [`McuLink`] owns the serial port exclusively. A dedicated IO thread
//! interleaves reads and writes: unsolicited telemetry lines are routed to
//! a channel the application drains, while command lines are written one at
//! a time, each awaiting its `ACK` before the next is released.
//!
//! # Contract
//!
//! - At most one command is in flight waiting for `ACK`.
//! - Every command must be acknowledged within 500 ms; on timeout it is
//!   retried up to three times with 100 ms backoff, after which the link
//!   reports [`Error::LinkLost`].
//! - Motor and servo commands are never silently dropped. LED commands go
//!   through [`McuLink::send_unreliable`] and may be dropped when the
//!   command lane is busy.
//! - Incoming lines that match no known grammar are logged and discarded.

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::wire::{parse_line, Command, LineReader, Telemetry};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Timing parameters of the acknowledgement contract.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How long a command may wait for its `ACK`.
    pub ack_timeout: Duration,
    /// Pause between retry attempts.
    pub retry_backoff: Duration,
    /// Attempts before the link is declared lost.
    pub max_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(100),
            max_attempts: 3,
        }
    }
}

/// Outcome of a single write-and-wait attempt.
enum Attempt {
    Acked,
    Rejected(String),
    TimedOut,
}

struct Request {
    line: String,
    reply: Sender<Attempt>,
}

/// Handle to the microcontroller serial link.
///
/// Cloneable senders are deliberately not exposed; all component handles go
/// through `&McuLink` so sends stay serialized in issue order.
pub struct McuLink {
    config: LinkConfig,
    cmd_tx: Sender<Request>,
    telemetry_rx: Receiver<Telemetry>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl McuLink {
    /// Start the link over the given transport.
    pub fn new(transport: Box<dyn Transport>, config: LinkConfig) -> Self {
        let (cmd_tx, cmd_rx) = bounded::<Request>(1);
        let (telemetry_tx, telemetry_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let shutdown = Arc::clone(&shutdown);
            let config = config.clone();
            std::thread::Builder::new()
                .name("mcu-link".into())
                .spawn(move || io_loop(transport, cmd_rx, telemetry_tx, shutdown, config))
                .expect("failed to spawn link thread")
        };

        Self {
            config,
            cmd_tx,
            telemetry_rx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// The telemetry stream.
    ///
    /// Encoder, IR and spurious lines arrive here in receipt order. The
    /// stream has a single logical consumer; clones compete for messages.
    pub fn telemetry(&self) -> Receiver<Telemetry> {
        self.telemetry_rx.clone()
    }

    /// Send a command, waiting for its acknowledgement.
    ///
    /// Retries per [`LinkConfig`]; surfaces [`Error::LinkLost`] when all
    /// attempts time out and [`Error::Rejected`] when the firmware answers
    /// `ERROR:` (no retry, the bytes would fail again).
    pub fn send(&self, command: &Command) -> Result<()> {
        let line = command.encode();

        for attempt in 1..=self.config.max_attempts {
            let (reply_tx, reply_rx) = bounded(1);
            self.cmd_tx
                .send(Request {
                    line: line.clone(),
                    reply: reply_tx,
                })
                .map_err(|_| Error::LinkDown)?;

            // The worker enforces the 500 ms deadline itself; the margin
            // here only covers queueing behind an in-flight command.
            let wait = self.config.ack_timeout * 2 + self.config.retry_backoff;
            match reply_rx.recv_timeout(wait) {
                Ok(Attempt::Acked) => return Ok(()),
                Ok(Attempt::Rejected(text)) => return Err(Error::Rejected(text)),
                Ok(Attempt::TimedOut) | Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "no ACK for {:?} (attempt {}/{})",
                        line.trim_end(),
                        attempt,
                        self.config.max_attempts
                    );
                    if attempt < self.config.max_attempts {
                        std::thread::sleep(self.config.retry_backoff);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::LinkDown),
            }
        }

        Err(Error::LinkLost {
            command: line.trim_end().to_string(),
            attempts: self.config.max_attempts,
        })
    }

    /// Send a droppable command without waiting for its acknowledgement.
    ///
    /// Only valid for commands where [`Command::is_droppable`] holds; the
    /// command is discarded with a debug log when the lane is busy.
    pub fn send_unreliable(&self, command: &Command) {
        debug_assert!(command.is_droppable());
        let (reply_tx, _reply_rx) = bounded(1);
        let request = Request {
            line: command.encode(),
            reply: reply_tx,
        };
        match self.cmd_tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(req)) => {
                log::debug!("dropping {:?} under backpressure", req.line.trim_end());
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("link worker gone, dropping command");
            }
        }
    }

    /// Convenience: motor speeds and directions.
    pub fn send_motor(
        &self,
        left_speed: u8,
        right_speed: u8,
        left_forward: bool,
        right_forward: bool,
    ) -> Result<()> {
        self.send(&Command::Motor {
            left_speed,
            right_speed,
            left_forward,
            right_forward,
        })
    }

    /// Convenience: zero-speed motor command.
    pub fn send_motor_stop(&self) -> Result<()> {
        self.send(&Command::motor_stop())
    }

    /// Convenience: validated servo angle.
    pub fn send_servo(&self, angle: u8) -> Result<()> {
        self.send(&Command::servo(angle)?)
    }

    /// Convenience: fire-and-forget eye animation.
    pub fn set_led(&self, pattern: crate::wire::LedPattern) {
        self.send_unreliable(&Command::Led(pattern));
    }
}

impl Drop for McuLink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// IO thread: pumps reads, routes lines, executes one command at a time.
fn io_loop(
    mut transport: Box<dyn Transport>,
    cmd_rx: Receiver<Request>,
    telemetry_tx: Sender<Telemetry>,
    shutdown: Arc<AtomicBool>,
    config: LinkConfig,
) {
    let mut lines = LineReader::new();
    let mut buf = [0u8; 256];

    while !shutdown.load(Ordering::Acquire) {
        pump_reads(&mut *transport, &mut buf, &mut lines, &telemetry_tx, None);

        match cmd_rx.recv_timeout(Duration::from_millis(2)) {
            Ok(request) => {
                let outcome = execute(&mut *transport, &mut buf, &mut lines, &telemetry_tx, &request, &config);
                let _ = request.reply.send(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Write one command line and wait for ACK/ERROR within the deadline.
fn execute(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    lines: &mut LineReader,
    telemetry_tx: &Sender<Telemetry>,
    request: &Request,
    config: &LinkConfig,
) -> Attempt {
    if let Err(e) = transport
        .write(request.line.as_bytes())
        .and_then(|_| transport.flush())
    {
        log::warn!("serial write failed: {}", e);
        return Attempt::TimedOut;
    }

    let deadline = Instant::now() + config.ack_timeout;
    let mut verdict: Option<Attempt> = None;
    while Instant::now() < deadline {
        pump_reads(transport, buf, lines, telemetry_tx, Some(&mut verdict));
        if let Some(outcome) = verdict.take() {
            return outcome;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Attempt::TimedOut
}

/// Drain available bytes, forwarding telemetry.
///
/// While a command is in flight (`verdict` is `Some`) ACK and ERROR lines
/// resolve it; otherwise they are spurious and only logged.
fn pump_reads(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    lines: &mut LineReader,
    telemetry_tx: &Sender<Telemetry>,
    mut verdict: Option<&mut Option<Attempt>>,
) {
    loop {
        let n = match transport.read(buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                log::warn!("serial read failed: {}", e);
                return;
            }
        };

        for line in lines.push(&buf[..n]) {
            match parse_line(&line) {
                Some(Telemetry::Ack) => match verdict.as_deref_mut() {
                    Some(slot) if slot.is_none() => *slot = Some(Attempt::Acked),
                    _ => log::debug!("spurious ACK"),
                },
                Some(Telemetry::Error(text)) => match verdict.as_deref_mut() {
                    Some(slot) if slot.is_none() => *slot = Some(Attempt::Rejected(text)),
                    _ => log::warn!("unsolicited ERROR line: {}", text),
                },
                Some(telemetry) => {
                    let _ = telemetry_tx.send(telemetry);
                }
                None => log::debug!("discarding unrecognized line: {:?}", line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::wire::LedPattern;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(30),
            retry_backoff: Duration::from_millis(5),
            max_attempts: 3,
        }
    }

    /// Device-side responder that ACKs every complete line it sees.
    fn spawn_acker(device: MockTransport, stop: Arc<AtomicBool>) -> JoinHandle<Vec<String>> {
        std::thread::spawn(move || {
            let mut seen = Vec::new();
            let mut pending = String::new();
            while !stop.load(Ordering::Acquire) {
                let written = device.take_written();
                if !written.is_empty() {
                    pending.push_str(&String::from_utf8_lossy(&written));
                    while let Some(pos) = pending.find('\n') {
                        let line: String = pending.drain(..=pos).collect();
                        seen.push(line.trim_end().to_string());
                        device.inject_read(b"ACK\n");
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            seen
        })
    }

    #[test]
    fn test_send_acked() {
        let device = MockTransport::new();
        let stop = Arc::new(AtomicBool::new(false));
        let acker = spawn_acker(device.clone(), Arc::clone(&stop));

        let link = McuLink::new(Box::new(device), fast_config());
        link.send_motor(100, 100, true, true).unwrap();
        link.send_motor_stop().unwrap();

        stop.store(true, Ordering::Release);
        let seen = acker.join().unwrap();
        assert_eq!(seen, vec!["MOTOR:100,100,1,1", "MOTOR:0,0,0,0"]);
    }

    #[test]
    fn test_silence_surfaces_link_lost() {
        let device = MockTransport::new();
        let link = McuLink::new(Box::new(device), fast_config());

        let result = link.send_motor(50, 50, true, true);
        assert!(matches!(
            result,
            Err(Error::LinkLost { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_rejected_command_not_retried() {
        let device = MockTransport::new();
        let stop = Arc::new(AtomicBool::new(false));
        let responder = {
            let device = device.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut rejections = 0;
                while !stop.load(Ordering::Acquire) {
                    if !device.take_written().is_empty() {
                        device.inject_read(b"ERROR:unknown command\n");
                        rejections += 1;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                rejections
            })
        };

        let link = McuLink::new(Box::new(device), fast_config());
        let result = link.send_servo(90);
        assert!(matches!(result, Err(Error::Rejected(_))));

        stop.store(true, Ordering::Release);
        assert_eq!(responder.join().unwrap(), 1);
    }

    #[test]
    fn test_telemetry_routed_in_order() {
        let device = MockTransport::new();
        let link = McuLink::new(Box::new(device.clone()), fast_config());
        let telemetry = link.telemetry();

        device.inject_read(b"ENCODER:10,20\nIR:35\nnoise line\nENCODER:11,21\n");

        let first = telemetry.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(first, Telemetry::Encoder { left: 10, right: 20 });
        let second = telemetry.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(second, Telemetry::Ir(35.0));
        let third = telemetry.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(third, Telemetry::Encoder { left: 11, right: 21 });
    }

    #[test]
    fn test_unreliable_never_blocks() {
        let device = MockTransport::new();
        let link = McuLink::new(Box::new(device), fast_config());

        // Nothing ever ACKs; the LED sends must still return immediately.
        let start = Instant::now();
        for _ in 0..5 {
            link.set_led(LedPattern::Moving);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

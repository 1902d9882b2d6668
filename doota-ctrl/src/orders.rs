//! Order verification
//!
//! A QR payload is a JSON object with exactly two fields, `order_id`
//! (integer) and `secret_key` (printable string). Anything else is
//! rejected. Parsed payloads are checked against an [`OrderDirectory`],
//! an external lookup assumed side-effect free and fast.

use crate::completion::{completion, Completion};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded QR payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QrPayload {
    pub order_id: u32,
    pub secret_key: String,
}

/// Parse raw payload bytes; any shape other than the two expected fields
/// is rejected.
pub fn parse_payload(bytes: &[u8]) -> Option<QrPayload> {
    let payload: QrPayload = serde_json::from_slice(bytes).ok()?;
    if payload.secret_key.is_empty()
        || !payload
            .secret_key
            .chars()
            .all(|c| c.is_ascii() && !c.is_ascii_control())
    {
        return None;
    }
    Some(payload)
}

/// Read-only order lookup. External collaborator; the implementation here
/// is only the boundary.
pub trait OrderDirectory: Send + Sync {
    fn exists(&self, order_id: u32, secret_key: &str) -> bool;
}

/// In-memory order table, for tests and the bundled file-backed setup.
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    orders: HashMap<u32, String>,
}

impl InMemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I: IntoIterator<Item = (u32, String)>>(pairs: I) -> Self {
        Self {
            orders: pairs.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, order_id: u32, secret_key: String) {
        self.orders.insert(order_id, secret_key);
    }
}

impl OrderDirectory for InMemoryOrders {
    fn exists(&self, order_id: u32, secret_key: &str) -> bool {
        self.orders
            .get(&order_id)
            .map(|key| key == secret_key)
            .unwrap_or(false)
    }
}

/// Outcome of one verification round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyResult {
    pub valid: bool,
    pub order_id: Option<u32>,
}

/// Wraps the directory lookup with bounded retries.
pub struct OrderVerifier {
    directory: Box<dyn OrderDirectory>,
    attempts: u32,
    retry_delay: Duration,
}

impl OrderVerifier {
    pub fn new(directory: Box<dyn OrderDirectory>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            directory,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Check a parsed payload against the directory.
    pub fn verify(&self, payload: &QrPayload) -> VerifyResult {
        for attempt in 1..=self.attempts {
            if self.directory.exists(payload.order_id, &payload.secret_key) {
                return VerifyResult {
                    valid: true,
                    order_id: Some(payload.order_id),
                };
            }
            if attempt < self.attempts {
                std::thread::sleep(self.retry_delay);
            }
        }
        VerifyResult {
            valid: false,
            order_id: Some(payload.order_id),
        }
    }
}

/// Source of decoded QR payload bytes. The decoder itself is external;
/// `capture` blocks its worker thread until a payload arrives or the
/// window closes.
pub trait QrSource: Send {
    fn capture(&mut self, timeout: Duration) -> Option<Vec<u8>>;
}

/// Spool-file QR source: the external decoder drops payload bytes into a
/// file which is consumed on pickup.
pub struct FileQr {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileQr {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl QrSource for FileQr {
    fn capture(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(bytes) = std::fs::read(&self.path) {
                if !bytes.is_empty() {
                    if let Err(e) = std::fs::remove_file(&self.path) {
                        log::warn!("failed to consume QR spool file: {}", e);
                    }
                    return Some(bytes);
                }
            }
            std::thread::sleep(self.poll_interval);
        }
        None
    }
}

/// Test QR source: hand it the bytes the "camera" will see.
#[derive(Clone, Default)]
pub struct ScriptedQr {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl ScriptedQr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Present a payload to the scanner.
    pub fn present(&self, bytes: Vec<u8>) {
        *self.slot.lock() = Some(bytes);
    }
}

impl QrSource for ScriptedQr {
    fn capture(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(bytes) = self.slot.lock().take() {
                return Some(bytes);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

/// Run capture + parse + verify on a worker thread, reporting through a
/// completion value the state machine polls.
pub fn spawn_verification(
    qr: Arc<Mutex<Box<dyn QrSource>>>,
    verifier: Arc<OrderVerifier>,
    timeout: Duration,
) -> Completion<VerifyResult> {
    let (completer, handle) = completion();

    std::thread::Builder::new()
        .name("qr-verify".into())
        .spawn(move || {
            let bytes = qr.lock().capture(timeout);
            let result = match bytes.as_deref().and_then(parse_payload) {
                Some(payload) => verifier.verify(&payload),
                None => {
                    if bytes.is_some() {
                        log::warn!("rejecting malformed QR payload");
                    }
                    VerifyResult {
                        valid: false,
                        order_id: None,
                    }
                }
            };
            completer.complete(result);
        })
        .expect("failed to spawn qr worker");

    handle
}

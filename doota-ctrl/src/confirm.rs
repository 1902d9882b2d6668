//! Loading confirmation
//!
//! The warehouse operator confirms that the package is in the box. On a
//! headless robot the trigger is deliberately pluggable: the production
//! binary listens on stdin (one line = confirmed), deployments can swap in
//! a button or network hook, and tests drive [`SharedConfirm`] directly.
//! The state machine only ever sees a single-shot completion.

use crate::completion::{completion, Completer, Completion};
use parking_lot::Mutex;
use std::io::BufRead;
use std::sync::Arc;

/// Source of operator confirmation events.
pub trait ConfirmSource: Send {
    /// Arm the source; the returned completion fires on confirmation.
    fn begin(&mut self) -> Completion<()>;
}

/// Confirmation by a line on stdin.
pub struct StdinConfirm;

impl ConfirmSource for StdinConfirm {
    fn begin(&mut self) -> Completion<()> {
        let (completer, handle) = completion();

        std::thread::Builder::new()
            .name("confirm-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut line = String::new();
                if stdin.lock().read_line(&mut line).is_ok() {
                    completer.complete(());
                }
            })
            .expect("failed to spawn confirm listener");

        handle
    }
}

/// Test confirmation source triggered by the test body.
#[derive(Clone, Default)]
pub struct SharedConfirm {
    armed: Arc<Mutex<Option<Completer<()>>>>,
}

impl SharedConfirm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the pending confirmation, if one is armed.
    pub fn confirm(&self) {
        if let Some(completer) = self.armed.lock().take() {
            completer.complete(());
        }
    }

    /// True while a confirmation is being waited on.
    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }
}

impl ConfirmSource for SharedConfirm {
    fn begin(&mut self) -> Completion<()> {
        let (completer, handle) = completion();
        *self.armed.lock() = Some(completer);
        handle
    }
}

//! Single-shot completion values.
//!
//! Worker tasks report back through these instead of callbacks: the worker
//! holds the [`Completer`], the tick loop polls the [`Completion`]. Each
//! pair delivers at most one value; dropping either side is harmless.

use crossbeam_channel::{bounded, Receiver, Sender};

/// Create a connected completer/completion pair.
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = bounded(1);
    (Completer { tx }, Completion { rx })
}

/// Write half, consumed by delivering the value.
pub struct Completer<T> {
    tx: Sender<T>,
}

impl<T> Completer<T> {
    /// Deliver the value. A vanished reader is ignored.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// Read half, polled by the tick loop.
pub struct Completion<T> {
    rx: Receiver<T>,
}

impl<T> Completion<T> {
    /// The value, if the worker has delivered it.
    pub fn poll(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Block up to `timeout` for the value (tests only, effectively).
    pub fn wait(&self, timeout: std::time::Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_before_and_after_completion() {
        let (completer, handle) = completion();
        assert!(handle.poll().is_none());

        completer.complete(42);
        assert_eq!(handle.poll(), Some(42));
        assert!(handle.poll().is_none());
    }

    #[test]
    fn test_dropped_reader_is_harmless() {
        let (completer, handle) = completion();
        drop(handle);
        completer.complete("ignored");
    }
}

//! Mock transport for testing
//!
//! A `MockTransport` can be cloned: one clone plays the host side (handed to
//! the link or lidar under test), the other plays the device side, injecting
//! bytes to be read and draining bytes that were written.

use super::Transport;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// In-memory transport for unit and integration tests.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject bytes to be read by the host side.
    pub fn inject_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        inner.read_buffer.extend(data);
    }

    /// Drain everything the host side has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.write_buffer)
    }

    /// Peek at written bytes without draining them.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().write_buffer.clone()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let available = inner.read_buffer.len().min(buffer.len());

        for slot in buffer.iter_mut().take(available) {
            *slot = inner.read_buffer.pop_front().unwrap();
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().read_buffer.len())
    }
}

//! Bounded byte stream between the application and a transport half.
//!
//! One writer, one reader. The writer pushes bytes (rejected when the stream
//! is closed or the push exceeds the available capacity) and eventually
//! closes; the reader peeks and pops. `is_finished` holds once the stream is
//! closed and fully drained. An error flag, once set, is sticky; it marks the
//! stream as poisoned after a reset.

use bytes::Bytes;

use crate::error::{Result, RiptideError};
use crate::ring::RingBuffer;

pub struct ByteStream {
    buf: RingBuffer,
    capacity: usize,
    closed: bool,
    error: bool,
    pushed: u64,
    popped: u64,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: RingBuffer::with_capacity(capacity),
            capacity,
            closed: false,
            error: false,
            pushed: 0,
            popped: 0,
        }
    }

    /// Logical capacity (the ring may be physically larger).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `data` to the stream.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(RiptideError::StreamClosed);
        }
        if data.len() > self.available_capacity() {
            return Err(RiptideError::CapacityExceeded {
                requested: data.len(),
                available: self.available_capacity(),
            });
        }
        self.buf.push(data)?;
        self.pushed += data.len() as u64;
        Ok(())
    }

    /// Signal that nothing more will be written. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes that can still be pushed.
    pub fn available_capacity(&self) -> usize {
        self.capacity - self.bytes_buffered()
    }

    /// Copy up to `n` buffered bytes without consuming them.
    pub fn peek(&self, n: usize) -> Bytes {
        self.buf.peek(n)
    }

    /// Remove and return up to `n` buffered bytes.
    pub fn pop(&mut self, n: usize) -> Bytes {
        let out = self.buf.pop(n);
        self.popped += out.len() as u64;
        out
    }

    /// Closed and fully drained.
    pub fn is_finished(&self) -> bool {
        self.closed && self.bytes_buffered() == 0
    }

    pub fn bytes_pushed(&self) -> u64 {
        self.pushed
    }

    pub fn bytes_popped(&self) -> u64 {
        self.popped
    }

    pub fn bytes_buffered(&self) -> usize {
        (self.pushed - self.popped) as usize
    }

    /// Latch the sticky error flag.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn has_error(&self) -> bool {
        self.error
    }
}

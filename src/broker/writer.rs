//! Per-subscriber outbound buffer
//!
//! The router and the command handlers append framed replies to a bounded
//! per-connection buffer; the connection task flushes the buffer to the
//! socket. The capacity is fixed at accept time: an append that would
//! overflow it is rejected and the reply dropped, which bounds per-connection
//! memory no matter how slow the peer drains.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec;

/// Error when appending to a [`SharedWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Connection is closed
    Closed,
    /// The reply does not fit in the remaining buffer capacity
    BufferFull,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::BufferFull => write!(f, "outbound buffer full"),
        }
    }
}

impl std::error::Error for SendError {}

/// Shared write buffer for one subscriber connection.
pub struct SharedWriter {
    /// Framed reply bytes waiting to be written
    buffer: Mutex<BytesMut>,
    /// Fixed capacity; appends beyond it are rejected
    capacity: usize,
    /// Notification when the buffer goes from empty to non-empty
    notify: Notify,
    /// Whether the connection is still alive
    alive: AtomicBool,
}

impl SharedWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(BytesMut::with_capacity(capacity.min(2048))),
            capacity,
            notify: Notify::new(),
            alive: AtomicBool::new(true),
        }
    }

    /// Check if the connection is still alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the connection as closed and wake the flush loop
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    /// Get the notify handle for the connection's flush branch
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Take all pending data from the buffer
    pub fn take_buffer(&self) -> BytesMut {
        self.buffer.lock().split()
    }

    /// Pending byte count (for tests/debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append a status reply (`+<text>\r\n`).
    pub fn send_status(&self, text: &str) -> Result<(), SendError> {
        self.append(|buf| codec::status_reply(buf, text))
    }

    /// Append an error reply (`-ERR <message>\r\n`).
    pub fn send_error(&self, message: &str) -> Result<(), SendError> {
        self.append(|buf| codec::error_reply(buf, message))
    }

    /// Append a bulk reply (`$<len>\r\n<bytes>\r\n`).
    pub fn send_bulk(&self, payload: &[u8]) -> Result<(), SendError> {
        self.append(|buf| codec::bulk_reply(buf, payload))
    }

    fn append(&self, encode: impl FnOnce(&mut BytesMut)) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }

        let was_empty = {
            let mut buffer = self.buffer.lock();
            let start_len = buffer.len();
            encode(&mut buffer);
            if buffer.len() > self.capacity {
                // Reject rather than grow; the reply is dropped
                buffer.truncate(start_len);
                return Err(SendError::BufferFull);
            }
            start_len == 0
        };

        // Only notify on the empty -> non-empty edge; coalesces wakeups
        // during bursts
        if was_empty {
            self.notify.notify_one();
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter")
            .field("buffer_len", &self.buffer_len())
            .field("capacity", &self.capacity)
            .field("alive", &self.is_alive())
            .finish()
    }
}

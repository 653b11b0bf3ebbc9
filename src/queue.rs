// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Frame queues
//!
//! Bounded byte FIFOs carrying whole GFF frames between the transports and
//! the controller. Producers push complete frames; consumers peek the
//! length byte and pop the frame in one go.
//!
//! [`SharedFrameQueue`] wraps a queue for use across tasks: every push and
//! pop happens under the lock, so a frame is never observed half-written.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::QueueError;
use crate::frame::{GFF_HEADER_SIZE, GFF_MAX_FRAME_SIZE};

/// Default queue capacity in bytes
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded byte FIFO
#[derive(Debug, Clone)]
pub struct FrameQueue {
    /// Stored bytes, oldest first
    buffer: VecDeque<u8>,
    /// Maximum number of stored bytes
    capacity: usize,
}

impl FrameQueue {
    /// Create an empty queue holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of stored bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored bytes
    pub fn occupied_size(&self) -> usize {
        self.buffer.len()
    }

    /// Remaining free bytes
    pub fn free_space(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append `bytes`, all or nothing
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        if bytes.len() > self.free_space() {
            return Err(QueueError::Overflow {
                needed: bytes.len(),
                available: self.free_space(),
            });
        }
        self.buffer.extend(bytes.iter().copied());
        Ok(())
    }

    /// Remove exactly `out.len()` bytes into `out`, all or nothing
    pub fn pop(&mut self, out: &mut [u8]) -> Result<(), QueueError> {
        if out.len() > self.buffer.len() {
            return Err(QueueError::Underflow {
                requested: out.len(),
                occupied: self.buffer.len(),
            });
        }
        let n = out.len();
        for (slot, byte) in out.iter_mut().zip(self.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(())
    }

    /// Read the next frame's length byte, optionally consuming it
    pub fn peek_length(&mut self, consume: bool) -> Option<u8> {
        if consume {
            self.buffer.pop_front()
        } else {
            self.buffer.front().copied()
        }
    }

    /// Pop one whole GFF frame into `out`
    ///
    /// Returns `Ok(None)` when the queue is empty and the frame size
    /// otherwise. When the stored bytes are shorter than the declared frame
    /// nothing is consumed.
    pub fn pop_frame(&mut self, out: &mut [u8]) -> Result<Option<usize>, QueueError> {
        let Some(len) = self.peek_length(false) else {
            return Ok(None);
        };
        let needed = len as usize + GFF_HEADER_SIZE;
        if needed > self.buffer.len() {
            return Err(QueueError::Underflow {
                requested: needed,
                occupied: self.buffer.len(),
            });
        }
        if needed > out.len() {
            return Err(QueueError::BufferTooSmall {
                size: out.len(),
                needed,
            });
        }
        self.pop(&mut out[..needed])?;
        Ok(Some(needed))
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Frame queue shared between a transport and the controller
#[derive(Debug, Clone)]
pub struct SharedFrameQueue {
    name: &'static str,
    inner: Arc<Mutex<FrameQueue>>,
}

impl SharedFrameQueue {
    /// Create a named shared queue
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(FrameQueue::new(capacity))),
        }
    }

    /// Label used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lock the queue
    ///
    /// A poisoned lock still guards a structurally valid queue, so the
    /// guard is recovered rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, FrameQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a whole frame
    pub fn push(&self, bytes: &[u8]) -> Result<(), QueueError> {
        self.lock().push(bytes)
    }

    /// Pop one whole frame as an owned buffer
    pub fn pop_frame(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let mut buf = [0u8; GFF_MAX_FRAME_SIZE];
        let popped = self.lock().pop_frame(&mut buf)?;
        Ok(popped.map(|n| buf[..n].to_vec()))
    }

    /// Number of stored bytes
    pub fn occupied_size(&self) -> usize {
        self.lock().occupied_size()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.lock().clear();
    }
}

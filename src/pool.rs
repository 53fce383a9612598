//! Fixed-size arena of raw frame buffers.
//!
//! Buffers move by value between the pool, the device and the delivery gate.
//! The pool keeps the membership record: which ids belong to the current
//! allocation round and whether each one is queued on the device or being
//! delivered. A buffer coming back with an id from an older round is stale
//! (the format changed while it was in flight) and is dropped.

use std::collections::HashMap;

use tracing::debug;

use crate::traits::{BufferId, FrameBuffer};

/// Number of buffers cycled through the device.
///
/// Higher means more memory held, lower means more sensitivity to consumer
/// processing time before the device runs out of buffers to fill.
pub const NUMBER_OF_CAPTURE_BUFFERS: usize = 3;

/// Where a pooled buffer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    /// Handed to the device, waiting to be filled.
    Queued,
    /// Returned by the device and being delivered.
    Delivering,
}

/// Frame buffer pool. Only mutated on the capture worker.
#[derive(Debug, Default)]
pub struct FrameBufferPool {
    generation: u32,
    frame_size: usize,
    buffers: HashMap<BufferId, BufferState>,
}

impl FrameBufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the current round and create `count` buffers of `frame_size`
    /// bytes, all marked queued. The caller hands them to the device.
    pub fn allocate(&mut self, frame_size: usize, count: usize) -> Vec<FrameBuffer> {
        self.clear();
        self.generation = self.generation.wrapping_add(1);
        self.frame_size = frame_size;

        debug!(generation = self.generation, frame_size, count, "Allocating frame buffers");

        let generation = self.generation;
        (0..count)
            .filter_map(|slot| u32::try_from(slot).ok())
            .map(|slot| {
                let id = BufferId { generation, slot };
                self.buffers.insert(id, BufferState::Queued);
                FrameBuffer::new(id, frame_size)
            })
            .collect()
    }

    /// Accept a buffer returned by the device. Returns `false` for buffers
    /// that do not belong to the current round or are not queued.
    pub fn accept(&mut self, buffer: &FrameBuffer) -> bool {
        match self.buffers.get_mut(&buffer.id()) {
            Some(state) if *state == BufferState::Queued => {
                *state = BufferState::Delivering;
                true
            }
            _ => false,
        }
    }

    /// Mark a delivered buffer as queued again and hand it back for the
    /// device. Stale buffers are dropped and `None` is returned.
    pub fn reclaim(&mut self, buffer: FrameBuffer) -> Option<FrameBuffer> {
        let state = self.buffers.get_mut(&buffer.id())?;
        *state = BufferState::Queued;
        Some(buffer)
    }

    /// Forget every buffer.
    pub fn clear(&mut self) {
        if !self.buffers.is_empty() {
            debug!(generation = self.generation, "Clearing frame buffers");
        }
        self.buffers.clear();
        self.frame_size = 0;
    }

    /// Buffers in the current round.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers currently queued on the device.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.buffers
            .values()
            .filter(|state| **state == BufferState::Queued)
            .count()
    }

    /// Size of each buffer in the current round, 0 when empty.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

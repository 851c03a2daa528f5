//! Circular readout buffer.
//!
//! Holds the most recent readouts delivered by the transport. Writes overwrite
//! in FIFO order once the ring wraps; if the write cursor laps a readout the
//! caller has not consumed yet, the push reports data loss so the engine can
//! raise `DataLost`.
//!
//! Slots keep their payloads after being read: a readout stays accessible
//! until its slot is overwritten, which is what lets a caller inspect partial
//! data after a timed-out acquire.

use bytes::Bytes;
use tracing::warn;

/// One readout resident in the ring.
#[derive(Debug, Clone)]
pub struct Readout {
    /// Monotonic index assigned at arrival; never resets within a session.
    pub index: u64,
    /// Readout payload, exactly one readout stride long.
    pub data: Bytes,
}

/// Fixed-capacity circular buffer of readouts.
#[derive(Debug)]
pub struct ReadoutRing {
    slots: Vec<Option<Readout>>,
    /// Index of the next readout to be written.
    write_cursor: u64,
    /// Index of the oldest readout not yet consumed by the caller.
    read_cursor: u64,
    /// Expected payload length per readout.
    stride: usize,
}

impl ReadoutRing {
    /// Ring sized for `capacity` readouts of `stride` bytes each. At least
    /// one slot is always allocated.
    pub fn new(capacity: usize, stride: usize) -> ReadoutRing {
        ReadoutRing {
            slots: (0..capacity.max(1)).map(|_| None).collect(),
            write_cursor: 0,
            read_cursor: 0,
            stride,
        }
    }

    /// Number of readout slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Expected payload length per readout.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Readouts written but not yet consumed.
    pub fn unread_count(&self) -> u64 {
        self.write_cursor - self.read_cursor
    }

    /// Append a readout, overwriting the oldest slot once full.
    ///
    /// Returns `true` when an unread readout was overwritten (data lost).
    pub fn push(&mut self, data: Bytes) -> bool {
        if self.stride != 0 && data.len() != self.stride {
            warn!(
                len = data.len(),
                stride = self.stride,
                "readout length does not match the committed stride"
            );
        }
        let capacity = self.slots.len() as u64;
        let mut lost = false;
        if self.write_cursor - self.read_cursor == capacity {
            // Writer lapped the reader; the oldest unread readout is gone.
            self.read_cursor += 1;
            lost = true;
        }
        let slot = (self.write_cursor % capacity) as usize;
        self.slots[slot] = Some(Readout {
            index: self.write_cursor,
            data,
        });
        self.write_cursor += 1;
        lost
    }

    /// Consume all unread readouts, oldest first.
    ///
    /// Returns the index of the first readout and cheap clones of the
    /// payloads (the slots themselves stay resident).
    pub fn take_unread(&mut self) -> (u64, Vec<Readout>) {
        let first = self.read_cursor;
        let capacity = self.slots.len() as u64;
        let mut out = Vec::with_capacity(self.unread_count() as usize);
        while self.read_cursor < self.write_cursor {
            let slot = (self.read_cursor % capacity) as usize;
            if let Some(readout) = &self.slots[slot] {
                out.push(readout.clone());
            }
            self.read_cursor += 1;
        }
        (first, out)
    }

    /// All readouts still resident in the ring, oldest first, consumed or not.
    pub fn resident(&self) -> Vec<Readout> {
        let capacity = self.slots.len() as u64;
        let start = self.write_cursor.saturating_sub(capacity);
        (start..self.write_cursor)
            .filter_map(|i| self.slots[(i % capacity) as usize].clone())
            .collect()
    }
}

//! Audio frame

use bytes::Bytes;

/// One inbound carrier audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Carrier sequence number, ascending from 1
    pub seq: u64,
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn new(seq: u64, payload: Bytes) -> Self {
        Self { seq, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

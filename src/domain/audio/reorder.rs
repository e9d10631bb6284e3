//! Inbound reorder buffer
//!
//! Releases frames strictly by ascending sequence number. Out-of-order
//! arrivals are held up to a fixed window; a missing frame is given up on
//! when the window overflows or the held frames have waited too long.
//! Frames behind the cursor are dropped: stale audio is useless to a live
//! conversation.

use super::frame::AudioFrame;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Reorder buffer configuration
#[derive(Debug, Clone)]
pub struct ReorderConfig {
    /// Maximum distance ahead of the cursor a frame may be held
    pub window: u64,
    /// Longest a held frame waits for a gap to fill
    pub max_wait: Duration,
    /// Sequence number of the first frame of a call
    pub first_seq: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            window: 16,
            max_wait: Duration::from_millis(200),
            first_seq: 1,
        }
    }
}

/// Held frame with arrival time
#[derive(Debug, Clone)]
struct BufferedFrame {
    frame: AudioFrame,
    arrival_time: Instant,
}

/// Bounded reorder buffer with an expected-next-sequence cursor
#[derive(Debug)]
pub struct ReorderBuffer {
    config: ReorderConfig,
    buffer: BTreeMap<u64, BufferedFrame>,
    next_seq: u64,
    frames_received: u64,
    frames_released: u64,
    frames_late: u64,
    frames_duplicate: u64,
    frames_skipped: u64,
}

impl ReorderBuffer {
    pub fn new(config: ReorderConfig) -> Self {
        let next_seq = config.first_seq;
        Self {
            config,
            buffer: BTreeMap::new(),
            next_seq,
            frames_received: 0,
            frames_released: 0,
            frames_late: 0,
            frames_duplicate: 0,
            frames_skipped: 0,
        }
    }

    /// Accept a frame; returns the frames now ready, in order
    pub fn push(&mut self, frame: AudioFrame, now: Instant) -> Vec<AudioFrame> {
        self.frames_received += 1;
        let seq = frame.seq;

        if seq < self.next_seq {
            warn!(
                "Dropping late audio frame: expected={}, got={}",
                self.next_seq, seq
            );
            self.frames_late += 1;
            return Vec::new();
        }

        if self.buffer.contains_key(&seq) {
            debug!("Dropping duplicate audio frame seq={}", seq);
            self.frames_duplicate += 1;
            return Vec::new();
        }

        self.buffer.insert(
            seq,
            BufferedFrame {
                frame,
                arrival_time: now,
            },
        );

        let mut ready = self.drain_ready();

        // Window overflow: give up on the oldest gap until the span fits
        while let Some(&highest) = self.buffer.keys().next_back() {
            if highest - self.next_seq < self.config.window {
                break;
            }
            self.skip_to_lowest();
            ready.extend(self.drain_ready());
        }

        ready
    }

    /// Release frames whose gap has been open longer than `max_wait`
    pub fn expire(&mut self, now: Instant) -> Vec<AudioFrame> {
        let oldest = self.buffer.values().map(|b| b.arrival_time).min();
        match oldest {
            Some(arrival) if now.duration_since(arrival) >= self.config.max_wait => {
                self.skip_to_lowest();
                self.drain_ready()
            }
            _ => Vec::new(),
        }
    }

    /// Release everything held, skipping all gaps
    pub fn drain_all(&mut self) -> Vec<AudioFrame> {
        let mut ready = Vec::with_capacity(self.buffer.len());
        while !self.buffer.is_empty() {
            self.skip_to_lowest();
            ready.extend(self.drain_ready());
        }
        ready
    }

    /// Expected next sequence number
    pub fn cursor(&self) -> u64 {
        self.next_seq
    }

    pub fn held(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReorderStats {
        ReorderStats {
            held: self.buffer.len(),
            frames_received: self.frames_received,
            frames_released: self.frames_released,
            frames_late: self.frames_late,
            frames_duplicate: self.frames_duplicate,
            frames_skipped: self.frames_skipped,
        }
    }

    fn drain_ready(&mut self) -> Vec<AudioFrame> {
        let mut ready = Vec::new();
        while let Some(buffered) = self.buffer.remove(&self.next_seq) {
            ready.push(buffered.frame);
            self.next_seq += 1;
        }
        self.frames_released += ready.len() as u64;
        ready
    }

    fn skip_to_lowest(&mut self) {
        if let Some(&lowest) = self.buffer.keys().next() {
            if lowest > self.next_seq {
                warn!(
                    "Skipping missing audio frames: {} to {}",
                    self.next_seq,
                    lowest - 1
                );
                self.frames_skipped += lowest - self.next_seq;
                self.next_seq = lowest;
            }
        }
    }
}

/// Reorder buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderStats {
    pub held: usize,
    pub frames_received: u64,
    pub frames_released: u64,
    pub frames_late: u64,
    pub frames_duplicate: u64,
    pub frames_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, Bytes::from(vec![0u8; 160]))
    }

    fn seqs(frames: &[AudioFrame]) -> Vec<u64> {
        frames.iter().map(|f| f.seq).collect()
    }

    #[test]
    fn test_in_order_passthrough() {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();
        for seq in 1..=5 {
            assert_eq!(seqs(&buffer.push(frame(seq), now)), vec![seq]);
        }
        assert_eq!(buffer.cursor(), 6);
        assert_eq!(buffer.held(), 0);
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();

        let mut consumed = Vec::new();
        consumed.extend(buffer.push(frame(3), now));
        assert!(consumed.is_empty());
        consumed.extend(buffer.push(frame(1), now));
        consumed.extend(buffer.push(frame(2), now));

        assert_eq!(seqs(&consumed), vec![1, 2, 3]);
    }

    #[test]
    fn test_late_frame_dropped_after_slot_flushed() {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();
        buffer.push(frame(3), now);
        buffer.push(frame(1), now);
        buffer.push(frame(2), now);

        assert!(buffer.push(frame(1), now).is_empty());
        assert_eq!(buffer.stats().frames_late, 1);
        assert_eq!(buffer.cursor(), 4);
    }

    #[test]
    fn test_gap_expires_after_max_wait() {
        let config = ReorderConfig {
            window: 16,
            max_wait: Duration::from_millis(100),
            first_seq: 1,
        };
        let mut buffer = ReorderBuffer::new(config);
        let start = Instant::now();

        assert!(buffer.push(frame(2), start).is_empty());
        assert!(buffer.push(frame(3), start).is_empty());
        assert!(buffer.expire(start + Duration::from_millis(50)).is_empty());

        let released = buffer.expire(start + Duration::from_millis(100));
        assert_eq!(seqs(&released), vec![2, 3]);
        assert_eq!(buffer.stats().frames_skipped, 1);

        // The slot for 1 closed with the expiry
        assert!(buffer.push(frame(1), start + Duration::from_millis(120)).is_empty());
    }

    #[test]
    fn test_window_overflow_skips_gap() {
        let config = ReorderConfig {
            window: 4,
            max_wait: Duration::from_secs(10),
            first_seq: 1,
        };
        let mut buffer = ReorderBuffer::new(config);
        let now = Instant::now();

        assert!(buffer.push(frame(2), now).is_empty());
        assert!(buffer.push(frame(4), now).is_empty());
        // 5 - 1 >= 4: frame 1 is given up on
        let released = buffer.push(frame(5), now);
        assert_eq!(seqs(&released), vec![2]);
        assert_eq!(buffer.cursor(), 3);
        assert_eq!(buffer.held(), 2);
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();
        buffer.push(frame(3), now);
        assert!(buffer.push(frame(3), now).is_empty());
        assert_eq!(buffer.stats().frames_duplicate, 1);
        assert_eq!(buffer.held(), 1);
    }

    #[test]
    fn test_drain_all_skips_gaps() {
        let mut buffer = ReorderBuffer::new(ReorderConfig::default());
        let now = Instant::now();
        buffer.push(frame(4), now);
        buffer.push(frame(2), now);
        buffer.push(frame(7), now);

        assert_eq!(seqs(&buffer.drain_all()), vec![2, 4, 7]);
        assert_eq!(buffer.cursor(), 8);
    }
}

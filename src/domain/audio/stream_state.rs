//! Per-call audio stream state owned by the conversation bridge

use super::reorder::{ReorderBuffer, ReorderConfig};

/// Ordering cursor, reorder buffer and barge-in flag for one call
///
/// Lives exactly as long as the call's bridge task.
#[derive(Debug)]
pub struct AudioStreamState {
    pub inbound: ReorderBuffer,
    playback_active: bool,
    barge_in: bool,
    current_turn: u64,
    cancelled_turn: Option<u64>,
    frames_forwarded: u64,
    frames_played: u64,
}

impl AudioStreamState {
    pub fn new(config: ReorderConfig) -> Self {
        Self {
            inbound: ReorderBuffer::new(config),
            playback_active: false,
            barge_in: false,
            current_turn: 0,
            cancelled_turn: None,
            frames_forwarded: 0,
            frames_played: 0,
        }
    }

    /// Synthesized audio for `turn` arrived; returns whether to relay it
    ///
    /// Audio belonging to a turn cancelled by barge-in is discarded.
    pub fn on_synthesized(&mut self, turn: u64) -> bool {
        if self.cancelled_turn.map_or(false, |cancelled| turn <= cancelled) {
            return false;
        }
        self.current_turn = turn;
        self.playback_active = true;
        self.barge_in = false;
        self.frames_played += 1;
        true
    }

    /// Caller speech detected; returns true when it interrupts playback
    pub fn on_speech_started(&mut self) -> bool {
        if !self.playback_active {
            return false;
        }
        self.playback_active = false;
        self.barge_in = true;
        self.cancelled_turn = Some(self.current_turn);
        true
    }

    pub fn on_playback_finished(&mut self) {
        self.playback_active = false;
    }

    pub fn on_forwarded(&mut self) {
        self.frames_forwarded += 1;
    }

    pub fn is_playback_active(&self) -> bool {
        self.playback_active
    }

    pub fn is_barge_in(&self) -> bool {
        self.barge_in
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barge_in_cancels_playback() {
        let mut state = AudioStreamState::new(ReorderConfig::default());
        assert!(!state.on_speech_started());

        assert!(state.on_synthesized(1));
        assert!(state.is_playback_active());

        assert!(state.on_speech_started());
        assert!(!state.is_playback_active());
        assert!(state.is_barge_in());

        // Tail of the interrupted turn is discarded
        assert!(!state.on_synthesized(1));
        assert!(!state.is_playback_active());

        // Next reply clears the flag
        assert!(state.on_synthesized(2));
        assert!(!state.is_barge_in());
        assert_eq!(state.frames_played(), 2);
    }

    #[test]
    fn test_playback_finished_prevents_barge_in() {
        let mut state = AudioStreamState::new(ReorderConfig::default());
        state.on_synthesized(1);
        state.on_playback_finished();
        assert!(!state.on_speech_started());
        assert!(!state.is_barge_in());
    }
}

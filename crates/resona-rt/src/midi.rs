//! The real-time MIDI event ring.
//!
//! A flat 32-bit word ring holding three-word events `(status, data1,
//! data2)`. The host produces at `(AVAIL_RTMIDI_EVENTS · 3 + RTMIDI_INDEX)
//! mod MIDI_BUFFER_SIZE` and bumps the available count; the worker consumes
//! once per wake, advancing `RTMIDI_INDEX` past what it read.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::constants::{MIDI_BUFFER_PAYLOAD_SIZE, MIDI_BUFFER_SIZE};
use crate::state::{SharedState, StateField};

pub struct MidiRing {
    words: Box<[AtomicI32]>,
}

impl MidiRing {
    pub fn new() -> Self {
        let mut words = Vec::with_capacity(MIDI_BUFFER_SIZE);
        words.resize_with(MIDI_BUFFER_SIZE, || AtomicI32::new(0));
        Self {
            words: words.into_boxed_slice(),
        }
    }

    /// Appends one event. Host side.
    ///
    /// The available-count increment is the publication edge; the worker
    /// only reads slots the count covers.
    pub fn produce(&self, state: &SharedState, status: i32, data1: i32, data2: i32) {
        let avail = state.load(StateField::AvailRtmidiEvents) as usize;
        let index = state.load(StateField::RtmidiIndex) as usize;
        let base = (avail * MIDI_BUFFER_PAYLOAD_SIZE + index) % MIDI_BUFFER_SIZE;
        for (offset, word) in [status, data1, data2].into_iter().enumerate() {
            self.words[(base + offset) % MIDI_BUFFER_SIZE].store(word, Ordering::Release);
        }
        state.add(StateField::AvailRtmidiEvents, 1);
    }

    /// Drains every pending event into `push`, in submission order. Worker
    /// side, called once per wake.
    pub fn drain(&self, state: &SharedState, mut push: impl FnMut(i32, i32, i32)) {
        let pending = state.load(StateField::AvailRtmidiEvents);
        if pending <= 0 {
            return;
        }
        let start = state.load(StateField::RtmidiIndex) as usize;
        for event in 0..pending as usize {
            let base = (start + event * MIDI_BUFFER_PAYLOAD_SIZE) % MIDI_BUFFER_SIZE;
            let status = self.words[base].load(Ordering::Acquire);
            let data1 = self.words[(base + 1) % MIDI_BUFFER_SIZE].load(Ordering::Acquire);
            let data2 = self.words[(base + 2) % MIDI_BUFFER_SIZE].load(Ordering::Acquire);
            push(status, data1, data2);
        }
        let consumed = pending as usize * MIDI_BUFFER_PAYLOAD_SIZE;
        state.store(
            StateField::RtmidiIndex,
            ((start + consumed) % MIDI_BUFFER_SIZE) as i32,
        );
        state.sub(StateField::AvailRtmidiEvents, pending);
    }
}

impl Default for MidiRing {
    fn default() -> Self {
        Self::new()
    }
}

//! The `audio_state` vector: atomically accessed 32-bit words indexed by a
//! stable enumeration, plus the doorbell the worker sleeps on.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};

/// Number of words in the state vector.
pub const STATE_WORDS: usize = 17;

/// Stable indices into the shared state vector.
///
/// Writer/reader discipline is per field, not per region: each word has one
/// designated producer and any number of consumers, so no coarse lock guards
/// the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StateField {
    /// 1 while the render loop is live. Written by the worker.
    IsPerforming = 0,
    /// 1 while paused; the worker parks on this word. Written by the host.
    IsPaused = 1,
    /// 1 requests a graceful stop. Monotonic within one performance.
    Stop = 2,
    /// The doorbell: the worker waits while this is 0; the audio backend
    /// (or the host, on stop) stores 1 and notifies.
    AtomicNotify = 3,
    /// Output channel count, published by the worker at performance start.
    Nchnls = 4,
    /// Input channel count (0 disables capture).
    NchnlsI = 5,
    /// Sample rate in Hz.
    SampleRate = 6,
    /// Engine block size in frames, published for the backend's benefit.
    Ksmps = 7,
    /// Ring occupancy in frames per channel (`_B`). Host-configured.
    HwBufferSize = 8,
    /// Frames the worker processes per wake (`_b`). Host-configured.
    SwBufferSize = 9,
    /// Frames available to the worker in `in_ring`. Producer: backend.
    AvailInBufs = 10,
    /// Frames available to the backend in `out_ring`. Producer: worker.
    AvailOutBufs = 11,
    /// Worker's read cursor into `in_ring`.
    InputReadIndex = 12,
    /// Worker's write cursor into `out_ring`.
    OutputWriteIndex = 13,
    /// 1 when the engine wants real-time MIDI.
    IsRequestingRtmidi = 14,
    /// Events pending in the MIDI ring. Producer: host.
    AvailRtmidiEvents = 15,
    /// Worker's consume cursor into the MIDI ring.
    RtmidiIndex = 16,
}

/// The shared state vector with its doorbell.
///
/// All access is atomic; `Acquire`/`Release` orderings give every reader the
/// most recent write on any thread. The wait/notify pair makes the worker's
/// two suspension points (`AtomicNotify`, `IsPaused`) explicit: a waiter
/// holds the wake lock while re-checking its predicate, so a notify between
/// the check and the park cannot be lost.
pub struct SharedState {
    words: [AtomicI32; STATE_WORDS],
    template_hw: i32,
    template_sw: i32,
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
}

impl SharedState {
    /// Creates the vector with the given ring geometry baked into the
    /// template, so end-of-performance resets restore it.
    pub fn with_buffer_sizes(hw_buffer_frames: i32, sw_buffer_frames: i32) -> Self {
        let state = Self {
            words: std::array::from_fn(|_| AtomicI32::new(0)),
            template_hw: hw_buffer_frames,
            template_sw: sw_buffer_frames,
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
        };
        state.reset_to_template();
        state
    }

    /// Loads one word.
    #[inline]
    pub fn load(&self, field: StateField) -> i32 {
        self.words[field as usize].load(Ordering::Acquire)
    }

    /// Stores one word. Does not wake sleepers; pair with
    /// [`notify_waiters`](Self::notify_waiters) when the target word gates a
    /// suspension point.
    #[inline]
    pub fn store(&self, field: StateField, value: i32) {
        self.words[field as usize].store(value, Ordering::Release);
    }

    /// Atomically adds `delta`, returning the previous value.
    #[inline]
    pub fn add(&self, field: StateField, delta: i32) -> i32 {
        self.words[field as usize].fetch_add(delta, Ordering::AcqRel)
    }

    /// Atomically subtracts `delta`, returning the previous value.
    #[inline]
    pub fn sub(&self, field: StateField, delta: i32) -> i32 {
        self.words[field as usize].fetch_sub(delta, Ordering::AcqRel)
    }

    /// Blocks while `field` equals `expected`.
    ///
    /// The render loop's gate is intentionally unconditional: termination
    /// comes from the stop/end checks in the loop body, never from this wait
    /// returning spuriously.
    pub fn wait_while(&self, field: StateField, expected: i32) {
        let mut guard = self.wake_lock.lock();
        while self.words[field as usize].load(Ordering::Acquire) == expected {
            self.wake_cond.wait(&mut guard);
        }
    }

    /// Bounded variant of [`wait_while`](Self::wait_while). Returns `true`
    /// if the word changed, `false` on timeout.
    pub fn wait_while_timeout(
        &self,
        field: StateField,
        expected: i32,
        timeout: std::time::Duration,
    ) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.wake_lock.lock();
        while self.words[field as usize].load(Ordering::Acquire) == expected {
            if self.wake_cond.wait_until(&mut guard, deadline).timed_out() {
                return self.words[field as usize].load(Ordering::Acquire) != expected;
            }
        }
        true
    }

    /// Wakes every thread parked in [`wait_while`](Self::wait_while).
    ///
    /// Callers store the new word value first; taking the wake lock here
    /// orders the notify after any concurrent waiter's predicate check.
    pub fn notify_waiters(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_cond.notify_all();
    }

    /// Stores `value` into `field` and wakes sleepers in one step.
    pub fn store_and_notify(&self, field: StateField, value: i32) {
        self.store(field, value);
        self.notify_waiters();
    }

    /// Returns every word to the constant template in place: all zeros
    /// except the host-configured ring geometry.
    ///
    /// The region is deliberately not reallocated: the worker and the
    /// backend hold references into it, and the backend re-reads the words
    /// on the next performance start.
    pub fn reset_to_template(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
        self.store(StateField::HwBufferSize, self.template_hw);
        self.store(StateField::SwBufferSize, self.template_sw);
    }

    /// Copies the full vector, for diagnostics and tests.
    pub fn snapshot(&self) -> [i32; STATE_WORDS] {
        std::array::from_fn(|i| self.words[i].load(Ordering::Acquire))
    }
}

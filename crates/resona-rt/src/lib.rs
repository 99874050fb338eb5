//! Shared-memory layout and real-time primitives for the Resona transport.
//!
//! Three agents cooperate over one shared region: the control host, the
//! synthesis worker, and the audio backend. This crate defines that region
//! (the atomic state vector, the dual audio rings, the MIDI event ring, and
//! the callback RPC buffers) together with the doorbell primitive the
//! worker sleeps on. No policy lives here; the transport logic that drives
//! these buffers belongs to `resona-bridge`.

pub mod callback;
pub mod constants;
pub mod midi;
pub mod rings;
pub mod state;

pub use callback::{CallbackBuffers, CallbackError};
pub use midi::MidiRing;
pub use rings::AudioRing;
pub use state::{SharedState, StateField, STATE_WORDS};

use std::sync::Arc;

/// The complete shared region: the seven buffers every agent can see.
///
/// One bundle is allocated per bridge instance and handed to the worker and
/// the audio backend by `Arc`. The region is stable for the lifetime of the
/// bridge; `reset` below returns the state words to their template without
/// reallocating, so outstanding references never dangle.
pub struct SharedBuffers {
    pub state: SharedState,
    pub in_ring: AudioRing,
    pub out_ring: AudioRing,
    pub midi: MidiRing,
    pub callbacks: CallbackBuffers,
}

impl SharedBuffers {
    /// Allocates the full region with the given ring geometry.
    ///
    /// `hw_buffer_frames` (`_B`) and `sw_buffer_frames` (`_b`) become part of
    /// the state template and survive end-of-performance resets.
    pub fn new(hw_buffer_frames: i32, sw_buffer_frames: i32) -> Arc<Self> {
        Arc::new(Self {
            state: SharedState::with_buffer_sizes(hw_buffer_frames, sw_buffer_frames),
            in_ring: AudioRing::new(),
            out_ring: AudioRing::new(),
            midi: MidiRing::new(),
            callbacks: CallbackBuffers::new(),
        })
    }

    /// Allocates the region with the default geometry from [`constants`].
    pub fn with_defaults() -> Arc<Self> {
        Self::new(
            constants::DEFAULT_HW_BUFFER_SIZE,
            constants::DEFAULT_SW_BUFFER_SIZE,
        )
    }
}

impl std::fmt::Debug for SharedBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffers")
            .field("state", &self.state.snapshot())
            .finish_non_exhaustive()
    }
}

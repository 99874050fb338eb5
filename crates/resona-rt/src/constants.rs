//! Shared constants table.
//!
//! These sizes fix the shared-memory layout. Every agent (host, worker, and
//! audio backend) derives offsets from the same values, so they are
//! compile-time constants rather than configuration.

/// Maximum channels either ring can carry. A performance uses the first
/// `NCHNLS` (respectively `NCHNLS_I`) of them.
pub const MAX_CHANNELS: usize = 8;

/// Ring capacity in frames per channel. `HW_BUFFER_SIZE` selects how many of
/// these a given performance actually uses.
pub const MAX_HARDWARE_BUFFER_SIZE: usize = 16_384;

/// Words per MIDI event: status, data1, data2.
pub const MIDI_BUFFER_PAYLOAD_SIZE: usize = 3;

/// Total words in the MIDI ring.
pub const MIDI_BUFFER_SIZE: usize = 1_024;

/// Size of each callback argument arena: bytes for the string region, slots
/// for the f64 region.
pub const CALLBACK_DATA_BUFFER_SIZE: usize = 16_384;

/// Words in the callback request ring, including the two cursor slots.
pub const CALLBACK_REQUEST_BUFFER_SIZE: usize = 4_096;

/// Default hardware ring occupancy (`_B`) in frames per channel.
pub const DEFAULT_HW_BUFFER_SIZE: i32 = 4_096;

/// Default frames the worker processes per doorbell wake (`_b`).
pub const DEFAULT_SW_BUFFER_SIZE: i32 = 256;

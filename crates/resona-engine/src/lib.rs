//! The synthesis-engine seam.
//!
//! The transport treats the engine as an opaque instance behind a fixed
//! C-style ABI: a block-rate perform call, interleaved spin/spout frame
//! buffers in engine units (±0dBFS), a handful of queries, real-time MIDI
//! injection, and an enumerated set of control/query entry points routed by
//! opcode. This crate defines that seam plus two deterministic reference
//! engines used by tests and demos.

pub mod api;
mod passthrough;
mod sine;

pub use api::{ApiArg, ApiValue, Opcode};
pub use passthrough::PassthroughEngine;
pub use sine::SineEngine;

/// The engine ABI the synthesis worker drives.
///
/// One instance is owned by the worker thread for its whole life, so the
/// trait only needs `Send`. Frame buffers are interleaved and `ksmps` frames
/// long; the transport converts between the engine's ±0dBFS scale and the
/// rings' normalized ±1.0.
pub trait SynthEngine: Send {
    /// Renders one block of `ksmps` frames into `spout`, consuming `spin`.
    /// Returns 0 while the performance should continue; any other value
    /// signals end of performance.
    fn perform_block(&mut self) -> i32;

    /// Input frame buffer, `ksmps × nchnls_i` interleaved samples.
    fn spin(&mut self) -> &mut [f64];

    /// Output frame buffer, `ksmps × nchnls` interleaved samples.
    fn spout(&self) -> &[f64];

    /// Sample rate in Hz.
    fn sr(&self) -> f64;

    /// Frames per `perform_block` call.
    fn ksmps(&self) -> usize;

    /// Output channel count.
    fn nchnls(&self) -> usize;

    /// Input channel count.
    fn nchnls_i(&self) -> usize;

    /// Full-scale reference amplitude of the engine's internal samples.
    fn zero_dbfs(&self) -> f64;

    /// Configured input device name; capture is enabled when it names an
    /// ADC source.
    fn input_name(&self) -> &str;

    /// True when the engine wants real-time MIDI delivered each wake.
    fn is_requesting_rtmidi(&self) -> bool;

    /// Injects one real-time MIDI event.
    fn push_midi(&mut self, status: i32, data1: i32, data2: i32);

    /// Requests a graceful end; the next `perform_block` may still run once
    /// to flush closing messages.
    fn stop(&mut self);

    /// Returns the engine to its just-created state.
    fn reset(&mut self);

    /// Drains one pending engine log line, oldest first.
    fn poll_message(&mut self) -> Option<String>;

    /// Routed control/query entry point.
    fn dispatch(&mut self, op: Opcode, args: &[ApiArg]) -> ApiValue;
}

/// Constructor the control host hands to the worker at initialization; the
/// worker runs it once on its own thread and owns the result.
pub type EngineFactory = Box<dyn FnOnce() -> anyhow::Result<Box<dyn SynthEngine>> + Send>;

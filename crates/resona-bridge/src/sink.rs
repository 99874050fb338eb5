//! The audio-backend seam.
//!
//! The backend is an external collaborator: it consumes `out_ring`,
//! produces `in_ring`, and rings the doorbell on its own clock. The
//! transport only pushes two things at it: the per-performance
//! configuration record, and play-state notifications. The host owns the
//! sink; the sink never holds a reference back.

use anyhow::Result;

use crate::play_state::{PerformanceConfig, PlayState};

pub trait AudioSink: Send {
    /// Receives the configuration for the performance that just started.
    /// Called once per performance, before any play-state callback runs.
    fn configure(&mut self, config: &PerformanceConfig);

    /// Receives every play-state transition, in order. Errors are logged
    /// and swallowed by the caller; they never abort a transition.
    fn on_play_state(&mut self, state: PlayState) -> Result<()>;
}

/// Backend used when no audio device is attached (tests, offline render).
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn configure(&mut self, config: &PerformanceConfig) {
        tracing::debug!(?config, "null sink configured");
    }

    fn on_play_state(&mut self, _state: PlayState) -> Result<()> {
        Ok(())
    }
}

//! Play states and the per-performance configuration record.

use serde::{Deserialize, Serialize};

use resona_rt::{SharedState, StateField};

/// The transport's play state, held on the control host and mirrored by the
/// audio backend. Transitions are broadcast worker → host; pause and resume
/// are driven by the host itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Stop,
    RealtimePerformanceStarted,
    RealtimePerformancePaused,
    RealtimePerformanceResumed,
    RealtimePerformanceEnded,
    RenderStarted,
    RenderEnded,
}

impl PlayState {
    /// States from which `stop()` is legal.
    pub fn is_stopable(self) -> bool {
        matches!(
            self,
            PlayState::RealtimePerformanceStarted
                | PlayState::RenderStarted
                | PlayState::RealtimePerformancePaused
                | PlayState::RealtimePerformanceResumed
        )
    }

    /// True while the worker owns the render loop; API calls must take the
    /// callback ring instead of the direct proxy.
    pub fn is_performance_live(self) -> bool {
        self.is_stopable()
    }

    /// End-of-performance states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlayState::RealtimePerformanceEnded | PlayState::RenderEnded
        )
    }
}

impl Default for PlayState {
    fn default() -> Self {
        PlayState::Stop
    }
}

/// Everything the audio backend needs for one performance, computed from
/// `audio_state` when the started broadcast arrives and handed over once;
/// the backend never reaches into host fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Output channels.
    pub nchnls_out: i32,
    /// Input channels; 0 disables capture.
    pub nchnls_in: i32,
    pub sample_rate: i32,
    /// Ring occupancy in frames per channel (`_B`).
    pub hw_buffer_frames: i32,
    /// Frames the worker processes per wake (`_b`).
    pub sw_buffer_frames: i32,
    /// Engine block size, for backends that schedule in engine quanta.
    pub ksmps: i32,
    /// True when the engine wants real-time MIDI forwarded.
    pub wants_midi: bool,
}

impl PerformanceConfig {
    /// Reads the published words out of the shared state vector.
    pub fn from_shared_state(state: &SharedState) -> Self {
        Self {
            nchnls_out: state.load(StateField::Nchnls),
            nchnls_in: state.load(StateField::NchnlsI),
            sample_rate: state.load(StateField::SampleRate),
            hw_buffer_frames: state.load(StateField::HwBufferSize),
            sw_buffer_frames: state.load(StateField::SwBufferSize),
            ksmps: state.load(StateField::Ksmps),
            wants_midi: state.load(StateField::IsRequestingRtmidi) != 0,
        }
    }
}

//! A wire-through engine: each block copies spin to spout unchanged.
//!
//! Exists for transport tests: with it, whatever the host feeds the input
//! ring must come back out of the output ring (scaled through ±0dBFS and
//! back), delayed by exactly one engine block.

use crate::api::{ApiArg, ApiValue, Opcode};
use crate::SynthEngine;

pub struct PassthroughEngine {
    sr: f64,
    ksmps: usize,
    nchnls: usize,
    zero_dbfs: f64,
    stopped: bool,
    blocks_rendered: u64,
    spin: Vec<f64>,
    spout: Vec<f64>,
}

impl PassthroughEngine {
    pub fn new() -> Self {
        let mut engine = Self {
            sr: 48_000.0,
            ksmps: 64,
            nchnls: 2,
            zero_dbfs: 32_768.0,
            stopped: false,
            blocks_rendered: 0,
            spin: Vec::new(),
            spout: Vec::new(),
        };
        engine.resize_frames();
        engine
    }

    pub fn with_ksmps(mut self, ksmps: usize) -> Self {
        self.ksmps = ksmps.max(1);
        self.resize_frames();
        self
    }

    pub fn with_channels(mut self, nchnls: usize) -> Self {
        self.nchnls = nchnls.max(1);
        self.resize_frames();
        self
    }

    fn resize_frames(&mut self) {
        self.spin = vec![0.0; self.ksmps * self.nchnls];
        self.spout = vec![0.0; self.ksmps * self.nchnls];
    }
}

impl Default for PassthroughEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthEngine for PassthroughEngine {
    fn perform_block(&mut self) -> i32 {
        if self.stopped {
            self.spout.fill(0.0);
            return 1;
        }
        self.spout.copy_from_slice(&self.spin);
        self.blocks_rendered += 1;
        0
    }

    fn spin(&mut self) -> &mut [f64] {
        &mut self.spin
    }

    fn spout(&self) -> &[f64] {
        &self.spout
    }

    fn sr(&self) -> f64 {
        self.sr
    }

    fn ksmps(&self) -> usize {
        self.ksmps
    }

    fn nchnls(&self) -> usize {
        self.nchnls
    }

    fn nchnls_i(&self) -> usize {
        self.nchnls
    }

    fn zero_dbfs(&self) -> f64 {
        self.zero_dbfs
    }

    fn input_name(&self) -> &str {
        "adc"
    }

    fn is_requesting_rtmidi(&self) -> bool {
        false
    }

    fn push_midi(&mut self, _status: i32, _data1: i32, _data2: i32) {}

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn reset(&mut self) {
        self.stopped = false;
        self.blocks_rendered = 0;
        self.resize_frames();
    }

    fn poll_message(&mut self) -> Option<String> {
        None
    }

    fn dispatch(&mut self, op: Opcode, _args: &[ApiArg]) -> ApiValue {
        match op {
            Opcode::GetScoreTime => {
                ApiValue::Double(self.blocks_rendered as f64 * self.ksmps as f64 / self.sr)
            }
            other => ApiValue::error(format!("{} is not supported by this engine", other.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_input_to_output() {
        let mut engine = PassthroughEngine::new().with_ksmps(4).with_channels(1);
        engine.spin().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(engine.perform_block(), 0);
        assert_eq!(engine.spout(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn stop_silences_and_ends() {
        let mut engine = PassthroughEngine::new().with_ksmps(4).with_channels(1);
        engine.spin().fill(0.7);
        engine.stop();
        assert_ne!(engine.perform_block(), 0);
        assert!(engine.spout().iter().all(|s| *s == 0.0));
    }
}

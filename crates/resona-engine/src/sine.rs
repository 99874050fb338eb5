//! A deterministic reference engine: one sine voice with control channels,
//! string channels, tables, and real-time MIDI.

use std::collections::{HashMap, VecDeque};
use std::f64::consts::TAU;

use crate::api::{arg_f64, arg_i32, arg_str, ApiArg, ApiValue, Opcode};
use crate::{Opcode::*, SynthEngine};

/// Phase-accumulator sine engine.
///
/// Deterministic by construction: identical option/channel/MIDI input yields
/// identical output after every reset, which the transport's round-trip
/// tests rely on.
pub struct SineEngine {
    sr: f64,
    ksmps: usize,
    nchnls: usize,
    zero_dbfs: f64,
    wants_midi: bool,
    duration: Option<f64>,

    frequency: f64,
    gain: f64,
    phase: f64,
    blocks_rendered: u64,
    stopped: bool,

    spin: Vec<f64>,
    spout: Vec<f64>,
    controls: HashMap<String, f64>,
    strings: HashMap<String, String>,
    tables: HashMap<i32, Vec<f64>>,
    messages: VecDeque<String>,
}

impl SineEngine {
    pub fn new() -> Self {
        let mut engine = Self {
            sr: 48_000.0,
            ksmps: 64,
            nchnls: 2,
            zero_dbfs: 32_768.0,
            wants_midi: false,
            duration: None,
            frequency: 440.0,
            gain: 0.5,
            phase: 0.0,
            blocks_rendered: 0,
            stopped: false,
            spin: Vec::new(),
            spout: Vec::new(),
            controls: HashMap::new(),
            strings: HashMap::new(),
            tables: HashMap::new(),
            messages: VecDeque::new(),
        };
        engine.resize_frames();
        engine
    }

    pub fn with_sample_rate(mut self, sr: f64) -> Self {
        self.sr = sr;
        self
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

    pub fn with_frequency(mut self, hz: f64) -> Self {
        self.frequency = hz;
        self
    }

    /// Enables real-time MIDI consumption.
    pub fn with_rtmidi(mut self) -> Self {
        self.wants_midi = true;
        self
    }

    /// Ends the performance naturally once this many seconds have rendered.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    fn resize_frames(&mut self) {
        self.spout = vec![0.0; self.ksmps * self.nchnls];
        self.spin = vec![0.0; self.ksmps * self.nchnls];
    }

    fn score_time(&self) -> f64 {
        self.blocks_rendered as f64 * self.ksmps as f64 / self.sr
    }

    fn try_dispatch(&mut self, op: Opcode, args: &[ApiArg]) -> Result<ApiValue, ApiValue> {
        Ok(match op {
            SetOption => {
                let option = arg_str(args, 0)?;
                tracing::debug!(option, "engine option set");
                self.messages.push_back(format!("option: {option}"));
                ApiValue::Unit
            }
            EvalCode | CompileProgram => {
                let code = arg_str(args, 0)?;
                self.messages
                    .push_back(format!("compiled {} bytes", code.len()));
                ApiValue::Int(0)
            }
            InputMessage | ScoreEvent => {
                let event = arg_str(args, 0)?;
                self.messages.push_back(format!("event: {event}"));
                ApiValue::Unit
            }
            GetControlChannel => {
                let name = arg_str(args, 0)?;
                ApiValue::Double(self.controls.get(name).copied().unwrap_or(0.0))
            }
            SetControlChannel => {
                let name = arg_str(args, 0)?.to_owned();
                let value = arg_f64(args, 1)?;
                match name.as_str() {
                    "freq" => self.frequency = value,
                    "gain" => self.gain = value,
                    _ => {}
                }
                self.controls.insert(name, value);
                ApiValue::Unit
            }
            GetStringChannel => {
                let name = arg_str(args, 0)?;
                ApiValue::Str(self.strings.get(name).cloned().unwrap_or_default())
            }
            SetStringChannel => {
                let name = arg_str(args, 0)?.to_owned();
                let value = arg_str(args, 1)?.to_owned();
                self.strings.insert(name, value);
                ApiValue::Unit
            }
            TableLength => {
                let table = arg_i32(args, 0)?;
                ApiValue::Int(self.tables.get(&table).map_or(-1, |t| t.len() as i32))
            }
            TableGet => {
                let table = arg_i32(args, 0)?;
                let index = arg_i32(args, 1)?;
                let value = self
                    .tables
                    .get(&table)
                    .and_then(|t| t.get(usize::try_from(index).ok()?))
                    .copied();
                match value {
                    Some(v) => ApiValue::Double(v),
                    None => ApiValue::error(format!("table {table} index {index} out of range")),
                }
            }
            TableSet => {
                let table = arg_i32(args, 0)?;
                let index = arg_i32(args, 1)?;
                let value = arg_f64(args, 2)?;
                let index =
                    usize::try_from(index).map_err(|_| ApiValue::error("negative table index"))?;
                let entries = self.tables.entry(table).or_default();
                if entries.len() <= index {
                    entries.resize(index + 1, 0.0);
                }
                entries[index] = value;
                ApiValue::Unit
            }
            GetScoreTime => ApiValue::Double(self.score_time()),
        })
    }
}

impl Default for SineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthEngine for SineEngine {
    fn perform_block(&mut self) -> i32 {
        if self.stopped {
            self.spout.fill(0.0);
            self.messages.push_back("performance terminated".into());
            return 1;
        }
        if let Some(duration) = self.duration {
            if self.score_time() >= duration {
                self.spout.fill(0.0);
                self.messages.push_back("score finished".into());
                return 1;
            }
        }
        let step = TAU * self.frequency / self.sr;
        for frame in 0..self.ksmps {
            let sample = self.phase.sin() * self.gain * self.zero_dbfs;
            for channel in 0..self.nchnls {
                self.spout[frame * self.nchnls + channel] = sample;
            }
            self.phase += step;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
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
        0
    }

    fn zero_dbfs(&self) -> f64 {
        self.zero_dbfs
    }

    fn input_name(&self) -> &str {
        ""
    }

    fn is_requesting_rtmidi(&self) -> bool {
        self.wants_midi
    }

    fn push_midi(&mut self, status: i32, data1: i32, data2: i32) {
        match status & 0xF0 {
            0x90 if data2 > 0 => {
                self.frequency = 440.0 * f64::powf(2.0, (data1 - 69) as f64 / 12.0);
                self.gain = data2 as f64 / 127.0;
            }
            0x80 | 0x90 => {
                self.gain = 0.0;
            }
            0xB0 if data1 == 7 => {
                self.gain = data2 as f64 / 127.0;
            }
            _ => {}
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn reset(&mut self) {
        self.frequency = 440.0;
        self.gain = 0.5;
        self.phase = 0.0;
        self.blocks_rendered = 0;
        self.stopped = false;
        self.controls.clear();
        self.strings.clear();
        self.tables.clear();
        self.messages.clear();
        self.resize_frames();
    }

    fn poll_message(&mut self) -> Option<String> {
        self.messages.pop_front()
    }

    fn dispatch(&mut self, op: Opcode, args: &[ApiArg]) -> ApiValue {
        self.try_dispatch(op, args).unwrap_or_else(|err| err)
    }
}

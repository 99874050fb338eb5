//! Transport scenarios: the test acts as the audio backend, feeding the
//! input ring and ringing the doorbell by hand.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use resona_bridge::{BridgeHost, BridgeOptions, PerformanceConfig, PlayState};
use resona_engine::{ApiArg, ApiValue, Opcode, PassthroughEngine, SineEngine, SynthEngine};
use resona_rt::{SharedBuffers, StateField};

const HW: i32 = 512;
const SW: i32 = 128;

fn options() -> BridgeOptions {
    BridgeOptions {
        hw_buffer_frames: HW,
        sw_buffer_frames: SW,
        sandbox_root: Some(std::env::temp_dir().join(format!(
            "resona-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ))),
    }
}

fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn ring_doorbell(shared: &SharedBuffers) {
    shared.state.store_and_notify(StateField::AtomicNotify, 1);
}

/// Backend half of one wake: `frames` input samples on channel 0, then the
/// doorbell.
fn feed_input(shared: &SharedBuffers, start_frame: usize, frames: usize, value: f64) {
    for i in 0..frames {
        shared.in_ring.write(0, (start_frame + i) % HW as usize, value);
    }
    shared.state.add(StateField::AvailInBufs, frames as i32);
    ring_doorbell(shared);
}

/// Minimal engine for MIDI and RPC observation: records what it receives.
struct RecordingEngine {
    midi: Arc<Mutex<Vec<(i32, i32, i32)>>>,
    spin: Vec<f64>,
    spout: Vec<f64>,
    stopped: bool,
}

impl RecordingEngine {
    fn new(midi: Arc<Mutex<Vec<(i32, i32, i32)>>>) -> Self {
        Self {
            midi,
            spin: vec![0.0; 64 * 2],
            spout: vec![0.0; 64 * 2],
            stopped: false,
        }
    }
}

impl SynthEngine for RecordingEngine {
    fn perform_block(&mut self) -> i32 {
        if self.stopped {
            return 1;
        }
        self.spout.fill(0.0);
        0
    }

    fn spin(&mut self) -> &mut [f64] {
        &mut self.spin
    }

    fn spout(&self) -> &[f64] {
        &self.spout
    }

    fn sr(&self) -> f64 {
        48_000.0
    }

    fn ksmps(&self) -> usize {
        64
    }

    fn nchnls(&self) -> usize {
        2
    }

    fn nchnls_i(&self) -> usize {
        0
    }

    fn zero_dbfs(&self) -> f64 {
        1.0
    }

    fn input_name(&self) -> &str {
        ""
    }

    fn is_requesting_rtmidi(&self) -> bool {
        true
    }

    fn push_midi(&mut self, status: i32, data1: i32, data2: i32) {
        self.midi.lock().unwrap().push((status, data1, data2));
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn reset(&mut self) {
        self.stopped = false;
    }

    fn poll_message(&mut self) -> Option<String> {
        None
    }

    fn dispatch(&mut self, op: Opcode, _args: &[ApiArg]) -> ApiValue {
        match op {
            Opcode::GetControlChannel => ApiValue::Double(42.0),
            other => ApiValue::error(format!("{} unsupported", other.name())),
        }
    }
}

fn passthrough_host() -> BridgeHost {
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| Ok(Box::new(PassthroughEngine::new()))))
        .unwrap();
    host
}

#[test]
fn happy_path_copies_one_chunk() {
    let host = passthrough_host();
    assert_eq!(host.start(), 0);
    assert_eq!(host.play_state(), PlayState::RealtimePerformanceStarted);

    let shared = Arc::clone(host.shared());
    // Published geometry matches the engine's queries.
    assert_eq!(shared.state.load(StateField::IsPerforming), 1);
    assert_eq!(shared.state.load(StateField::Nchnls), 2);
    assert_eq!(shared.state.load(StateField::NchnlsI), 2);
    assert_eq!(shared.state.load(StateField::SampleRate), 48_000);
    assert_eq!(shared.state.load(StateField::Ksmps), 64);

    feed_input(&shared, 0, SW as usize, 0.5);
    assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) == SW));
    assert_eq!(shared.state.load(StateField::AvailInBufs), 0);
    assert_eq!(shared.state.load(StateField::OutputWriteIndex), SW);

    // Pass-through delays by one engine block: the first ksmps output
    // frames are silence, then the fed value comes back out, rescaled
    // through 0dBFS and back.
    for frame in 0..64 {
        assert_eq!(shared.out_ring.read(0, frame), 0.0, "frame {frame}");
    }
    for frame in 64..SW as usize {
        let sample = shared.out_ring.read(0, frame);
        assert!((sample - 0.5).abs() < 1e-12, "frame {frame}: {sample}");
    }

    assert_eq!(host.stop(), 0);
}

#[test]
fn pause_holds_output_and_resume_releases_it() {
    let host = passthrough_host();
    assert_eq!(host.start(), 0);
    let shared = Arc::clone(host.shared());

    feed_input(&shared, 0, SW as usize, 0.25);
    assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) == SW));

    host.pause();
    assert_eq!(host.play_state(), PlayState::RealtimePerformancePaused);

    // More input plus a doorbell must produce nothing while paused.
    feed_input(&shared, SW as usize, SW as usize, 0.25);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(shared.state.load(StateField::AvailOutBufs), SW);

    host.resume();
    assert_eq!(host.play_state(), PlayState::RealtimePerformanceResumed);
    assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) == 2 * SW));

    assert_eq!(host.stop(), 0);
}

#[test]
fn stop_while_paused_restores_the_template() {
    let host = passthrough_host();
    assert_eq!(host.start(), 0);
    let shared = Arc::clone(host.shared());

    feed_input(&shared, 0, SW as usize, 0.1);
    assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) == SW));
    host.pause();

    assert_eq!(host.stop(), 0);
    assert_eq!(host.play_state(), PlayState::RealtimePerformanceEnded);

    let expected = SharedBuffers::new(HW, SW).state.snapshot();
    assert_eq!(shared.state.snapshot(), expected);
}

#[test]
fn stop_outside_stopable_changes_nothing() {
    let host = passthrough_host();
    let before = host.shared().state.snapshot();
    assert_eq!(host.stop(), -1);
    assert_eq!(host.shared().state.snapshot(), before);
    assert_eq!(host.play_state(), PlayState::Stop);
}

#[test]
fn start_without_engine_fails() {
    let host = BridgeHost::new(options()).unwrap();
    assert_eq!(host.start(), -1);
}

#[test]
fn start_while_live_fails() {
    let host = passthrough_host();
    assert_eq!(host.start(), 0);
    assert_eq!(host.start(), -1);
    assert_eq!(host.stop(), 0);
}

#[test]
fn midi_events_reach_the_engine_in_order() {
    let midi = Arc::new(Mutex::new(Vec::new()));
    let mut host = BridgeHost::new(options()).unwrap();
    let engine_midi = Arc::clone(&midi);
    host.initialize(Box::new(move || {
        Ok(Box::new(RecordingEngine::new(engine_midi)))
    }))
    .unwrap();

    assert_eq!(host.start(), 0);
    let shared = Arc::clone(host.shared());
    assert_eq!(shared.state.load(StateField::IsRequestingRtmidi), 1);

    host.on_midi(0x90, 60, 100);
    host.on_midi(0x80, 60, 0);
    host.on_midi(0xB0, 7, 64);
    assert_eq!(shared.state.load(StateField::AvailRtmidiEvents), 3);

    ring_doorbell(&shared);
    assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) >= SW));

    assert_eq!(
        midi.lock().unwrap().as_slice(),
        &[(0x90, 60, 100), (0x80, 60, 0), (0xB0, 7, 64)]
    );
    assert_eq!(shared.state.load(StateField::AvailRtmidiEvents), 0);
    assert_eq!(shared.state.load(StateField::RtmidiIndex), 9);

    assert_eq!(host.stop(), 0);
}

#[test]
fn api_call_during_performance_takes_the_callback_ring() {
    let midi = Arc::new(Mutex::new(Vec::new()));
    let mut host = BridgeHost::new(options()).unwrap();
    let engine_midi = Arc::clone(&midi);
    host.initialize(Box::new(move || {
        Ok(Box::new(RecordingEngine::new(engine_midi)))
    }))
    .unwrap();
    assert_eq!(host.start(), 0);

    let shared = Arc::clone(host.shared());
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let value = std::thread::scope(|scope| {
        let ringer_done = Arc::clone(&done);
        let ringer_shared = Arc::clone(&shared);
        scope.spawn(move || {
            while !ringer_done.load(std::sync::atomic::Ordering::Relaxed) {
                ring_doorbell(&ringer_shared);
                std::thread::sleep(Duration::from_millis(2));
            }
        });
        let value = host.get_control_channel("volume");
        done.store(true, std::sync::atomic::Ordering::Relaxed);
        value
    });

    assert_eq!(value, ApiValue::Double(42.0));
    assert_eq!(host.pending_api_calls(), 0);
    assert_eq!(host.stop(), 0);
}

#[test]
fn api_roundtrip_while_idle_uses_the_proxy() {
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| Ok(Box::new(SineEngine::new()))))
        .unwrap();

    assert_eq!(host.set_control_channel("freq", 220.0), ApiValue::Unit);
    assert_eq!(host.get_control_channel("freq"), ApiValue::Double(220.0));
    assert_eq!(host.pending_api_calls(), 0);
}

#[test]
fn engine_log_lines_reach_message_callbacks() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| Ok(Box::new(SineEngine::new()))))
        .unwrap();
    let sink_lines = Arc::clone(&lines);
    host.add_message_callback(move |line| sink_lines.lock().unwrap().push(line.to_owned()));

    host.set_option("--sample-accurate");
    assert!(wait_until(|| {
        lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains("--sample-accurate"))
    }));
}

#[test]
fn play_state_callbacks_observe_transitions_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let host = passthrough_host();
    let callback_seen = Arc::clone(&seen);
    host.add_play_state_callback(move |state| callback_seen.lock().unwrap().push(state));

    assert_eq!(host.start(), 0);
    host.pause();
    host.resume();
    assert_eq!(host.stop(), 0);

    assert!(wait_until(|| seen.lock().unwrap().len() >= 4));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[
            PlayState::RealtimePerformanceStarted,
            PlayState::RealtimePerformancePaused,
            PlayState::RealtimePerformanceResumed,
            PlayState::RealtimePerformanceEnded,
        ]
    );
}

#[test]
fn reset_then_start_reproduces_the_first_performance() {
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| Ok(Box::new(SineEngine::new()))))
        .unwrap();
    let shared = Arc::clone(host.shared());

    let run_once = || {
        assert_eq!(host.start(), 0);
        ring_doorbell(&shared);
        assert!(wait_until(|| shared.state.load(StateField::AvailOutBufs) == SW));
        let captured: Vec<f64> = (0..SW as usize)
            .map(|frame| shared.out_ring.read(0, frame))
            .collect();
        assert_eq!(host.stop(), 0);
        captured
    };

    let first = run_once();
    host.reset().unwrap();
    let second = run_once();
    assert!(first.iter().any(|sample| *sample != 0.0));
    assert_eq!(first, second);
}

#[test]
fn offline_render_runs_to_completion() {
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| {
        Ok(Box::new(SineEngine::new().with_duration(0.01)))
    }))
    .unwrap();

    assert_eq!(host.start_render(), 0);
    assert!(wait_until(|| host.play_state() == PlayState::RenderEnded));

    let expected = SharedBuffers::new(HW, SW).state.snapshot();
    assert_eq!(host.shared().state.snapshot(), expected);
}

#[test]
fn stop_interrupts_an_endless_render() {
    let mut host = BridgeHost::new(options()).unwrap();
    host.initialize(Box::new(|| Ok(Box::new(SineEngine::new()))))
        .unwrap();

    assert_eq!(host.start_render(), 0);
    assert_eq!(host.play_state(), PlayState::RenderStarted);
    assert_eq!(host.stop(), 0);
    assert_eq!(host.play_state(), PlayState::RenderEnded);
}

#[test]
fn sink_receives_configuration_once_per_performance() {
    struct ProbeSink {
        configs: Arc<Mutex<Vec<PerformanceConfig>>>,
        states: Arc<Mutex<Vec<PlayState>>>,
    }
    impl resona_bridge::AudioSink for ProbeSink {
        fn configure(&mut self, config: &PerformanceConfig) {
            self.configs.lock().unwrap().push(*config);
        }
        fn on_play_state(&mut self, state: PlayState) -> anyhow::Result<()> {
            self.states.lock().unwrap().push(state);
            Ok(())
        }
    }

    let configs = Arc::new(Mutex::new(Vec::new()));
    let states = Arc::new(Mutex::new(Vec::new()));
    let host = passthrough_host();
    host.set_audio_sink(Box::new(ProbeSink {
        configs: Arc::clone(&configs),
        states: Arc::clone(&states),
    }));

    assert_eq!(host.start(), 0);
    assert_eq!(host.stop(), 0);

    let configs = configs.lock().unwrap();
    assert_eq!(configs.len(), 1);
    assert_eq!(
        configs[0],
        PerformanceConfig {
            nchnls_out: 2,
            nchnls_in: 2,
            sample_rate: 48_000,
            hw_buffer_frames: HW,
            sw_buffer_frames: SW,
            ksmps: 64,
            wants_midi: false,
        }
    );
    let states = states.lock().unwrap();
    assert_eq!(
        states.as_slice(),
        &[
            PlayState::RealtimePerformanceStarted,
            PlayState::RealtimePerformanceEnded,
        ]
    );
}

#[test]
fn initialize_twice_fails() {
    let mut host = passthrough_host();
    assert!(host
        .initialize(Box::new(|| Ok(Box::new(PassthroughEngine::new()))))
        .is_err());
}

#[test]
fn failed_engine_creation_surfaces_and_leaves_host_unstartable() {
    let mut host = BridgeHost::new(options()).unwrap();
    let result = host.initialize(Box::new(|| anyhow::bail!("no wasm payload")));
    assert!(result.is_err());
    assert_eq!(host.start(), -1);
}

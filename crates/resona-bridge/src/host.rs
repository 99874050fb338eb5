//! The control-host façade.
//!
//! Owns the shared region and the worker, and exposes the flat operation
//! namespace: lifecycle (`initialize`/`start`/`stop`/`pause`/`resume`/
//! `reset`), MIDI ingress, callback registration, the routed engine API,
//! and the sandboxed filesystem namespace.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use resona_engine::{ApiArg, ApiValue, EngineFactory, Opcode};
use resona_rt::{SharedBuffers, StateField};

use crate::fs::{FsEntry, FsError, SandboxFs};
use crate::messages::ControlRequest;
use crate::play_state::{PerformanceConfig, PlayState};
use crate::router;
use crate::rpc::{self, ReturnQueue, UidAllocator};
use crate::sink::{AudioSink, NullSink};
use crate::worker::{self, WorkerPorts};

/// Host configuration. The ring geometry becomes part of the shared state
/// template; the sandbox root defaults to a per-process temp directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Ring occupancy in frames per channel (`_B`).
    pub hw_buffer_frames: i32,
    /// Frames the worker processes per doorbell wake (`_b`).
    pub sw_buffer_frames: i32,
    /// Root of the in-sandbox filesystem namespace.
    pub sandbox_root: Option<PathBuf>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            hw_buffer_frames: resona_rt::constants::DEFAULT_HW_BUFFER_SIZE,
            sw_buffer_frames: resona_rt::constants::DEFAULT_SW_BUFFER_SIZE,
            sandbox_root: None,
        }
    }
}

pub type MessageCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type PlayStateCallback = Box<dyn Fn(PlayState) + Send + Sync>;

/// State shared between the façade and the router thread.
pub(crate) struct HostShared {
    pub shared: Arc<SharedBuffers>,
    pub play_state: Mutex<PlayState>,
    pub message_callbacks: Mutex<Vec<MessageCallback>>,
    pub play_state_callbacks: Mutex<Vec<PlayStateCallback>>,
    pub return_queue: ReturnQueue,
    pub uids: UidAllocator,
    pub sink: Mutex<Box<dyn AudioSink>>,
    pub start_pending: Mutex<Option<Sender<()>>>,
    pub stop_pending: Mutex<Option<Sender<()>>>,
    /// Serializes callback-ring producers; the ring is single-producer by
    /// contract.
    pub encode_lock: Mutex<()>,
}

impl HostShared {
    /// Applies one play-state transition: state, backend, callbacks,
    /// completion tokens, in that order.
    pub(crate) fn apply_play_state(&self, state: PlayState) {
        if state.is_terminal() {
            // Erase residual cursors so the next performance starts from
            // the template, and leave no caller waiting on a dead uid.
            // Ordered before the state word flips so nobody observes an end
            // state over a stale region.
            self.shared.state.reset_to_template();
            self.return_queue.fail_all("performance ended");
        }
        *self.play_state.lock() = state;

        if state == PlayState::RealtimePerformanceStarted {
            let config = PerformanceConfig::from_shared_state(&self.shared.state);
            self.sink.lock().configure(&config);
        }

        if let Err(err) = self.sink.lock().on_play_state(state) {
            tracing::warn!(%err, ?state, "audio sink rejected play-state notification");
        }

        let callbacks = self.play_state_callbacks.lock();
        for callback in callbacks.iter() {
            // One panicking callback must not rob the rest of the
            // transition.
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(state)));
            if result.is_err() {
                tracing::error!(?state, "play-state callback panicked");
            }
        }
        drop(callbacks);

        match state {
            PlayState::RealtimePerformanceStarted | PlayState::RenderStarted => {
                if let Some(tx) = self.start_pending.lock().take() {
                    let _ = tx.send(());
                }
            }
            state if state.is_terminal() => {
                // A terminal state also resolves a pending start, so a
                // failed start cannot hang its caller.
                if let Some(tx) = self.start_pending.lock().take() {
                    let _ = tx.send(());
                }
                if let Some(tx) = self.stop_pending.lock().take() {
                    let _ = tx.send(());
                }
            }
            _ => {}
        }
    }

    pub(crate) fn dispatch_log(&self, line: &str) {
        for callback in self.message_callbacks.lock().iter() {
            callback(line);
        }
    }
}

struct Runtime {
    control_tx: Sender<ControlRequest>,
    worker: JoinHandle<()>,
    router: JoinHandle<()>,
}

/// The control host.
pub struct BridgeHost {
    hs: Arc<HostShared>,
    fs: SandboxFs,
    runtime: Option<Runtime>,
}

impl BridgeHost {
    pub fn new(options: BridgeOptions) -> anyhow::Result<Self> {
        let shared = SharedBuffers::new(options.hw_buffer_frames, options.sw_buffer_frames);
        let sandbox_root = options
            .sandbox_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("resona-{}", std::process::id())));
        let fs = SandboxFs::new(sandbox_root).context("creating sandbox filesystem root")?;
        Ok(Self {
            hs: Arc::new(HostShared {
                shared,
                play_state: Mutex::new(PlayState::Stop),
                message_callbacks: Mutex::new(Vec::new()),
                play_state_callbacks: Mutex::new(Vec::new()),
                return_queue: ReturnQueue::default(),
                uids: UidAllocator::default(),
                sink: Mutex::new(Box::new(NullSink)),
                start_pending: Mutex::new(None),
                stop_pending: Mutex::new(None),
                encode_lock: Mutex::new(()),
            }),
            fs,
            runtime: None,
        })
    }

    /// The shared region, for the audio backend to map.
    pub fn shared(&self) -> &Arc<SharedBuffers> {
        &self.hs.shared
    }

    /// Installs the audio backend. Replaces the null sink; call before
    /// `start` so the per-performance configuration reaches it.
    pub fn set_audio_sink(&self, sink: Box<dyn AudioSink>) {
        *self.hs.sink.lock() = sink;
    }

    pub fn play_state(&self) -> PlayState {
        *self.hs.play_state.lock()
    }

    /// Outstanding API completions, for diagnostics.
    pub fn pending_api_calls(&self) -> usize {
        self.hs.return_queue.len()
    }

    /// Spawns the worker, runs the engine constructor on it, and waits for
    /// exactly one engine instance to exist. Re-entrant calls fail.
    pub fn initialize(&mut self, factory: EngineFactory) -> anyhow::Result<()> {
        if self.runtime.is_some() {
            bail!("bridge is already initialized");
        }

        let (control_tx, control_rx) = unbounded();
        let (broadcast_tx, broadcast_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        let (created_tx, created_rx) = bounded(1);

        let worker = worker::spawn(
            factory,
            Arc::clone(&self.hs.shared),
            WorkerPorts {
                control_rx,
                broadcast_tx,
                reply_tx,
            },
            created_tx,
        )
        .context("spawning synthesis worker")?;

        let router = {
            let hs = Arc::clone(&self.hs);
            std::thread::Builder::new()
                .name("resona-router".into())
                .spawn(move || router::run(hs, broadcast_rx, reply_rx))
                .context("spawning router thread")?
        };

        let created = created_rx
            .recv()
            .context("worker exited before reporting engine creation")
            .and_then(|result| result);
        match created {
            Ok(()) => {
                self.runtime = Some(Runtime {
                    control_tx,
                    worker,
                    router,
                });
                Ok(())
            }
            Err(err) => {
                // The worker is already gone; let the router drain out too.
                drop(control_tx);
                let _ = worker.join();
                let _ = router.join();
                Err(err.context("engine creation failed"))
            }
        }
    }

    /// Starts a realtime performance. Returns 0 once the started broadcast
    /// lands, -1 when no engine exists or a performance is already live.
    pub fn start(&self) -> i32 {
        self.start_inner(false)
    }

    /// Starts an offline render.
    pub fn start_render(&self) -> i32 {
        self.start_inner(true)
    }

    fn start_inner(&self, render: bool) -> i32 {
        let Some(runtime) = &self.runtime else {
            return -1;
        };
        if self.play_state().is_performance_live() {
            return -1;
        }
        let (tx, rx) = bounded(1);
        *self.hs.start_pending.lock() = Some(tx);
        if runtime
            .control_tx
            .send(ControlRequest::Start { render })
            .is_err()
        {
            self.hs.start_pending.lock().take();
            return -1;
        }
        // Fulfilled by the started broadcast, or by any terminal state.
        let _ = rx.recv();
        0
    }

    /// Requests a graceful stop and waits for the end broadcast. Returns -1
    /// when the current state is not stopable, leaving the state words
    /// untouched.
    pub fn stop(&self) -> i32 {
        let play_state = self.play_state();
        if !play_state.is_stopable() {
            return -1;
        }
        let (tx, rx) = bounded(1);
        *self.hs.stop_pending.lock() = Some(tx);

        // The performance may have ended on its own between the state check
        // and token registration; don't stamp stop flags over the already
        // reset template or wait on a broadcast that has come and gone.
        if self.play_state().is_terminal() {
            self.hs.stop_pending.lock().take();
            return 0;
        }

        let state = &self.hs.shared.state;
        state.store(StateField::Stop, 1);
        state.store(StateField::IsPerforming, 0);
        if state.load(StateField::IsPaused) == 1 {
            state.store_and_notify(StateField::IsPaused, 0);
        }
        if play_state != PlayState::RenderStarted {
            state.store_and_notify(StateField::AtomicNotify, 1);
        }

        let _ = rx.recv();
        0
    }

    /// Pauses a live realtime performance; no-op in any other state.
    pub fn pause(&self) {
        let state = &self.hs.shared.state;
        if state.load(StateField::IsPaused) == 0
            && state.load(StateField::Stop) == 0
            && state.load(StateField::IsPerforming) == 1
        {
            state.store(StateField::IsPaused, 1);
            self.hs
                .apply_play_state(PlayState::RealtimePerformancePaused);
        }
    }

    /// Resumes a paused performance; no-op unless actually paused.
    pub fn resume(&self) {
        let state = &self.hs.shared.state;
        if state.load(StateField::IsPaused) == 1
            && state.load(StateField::Stop) == 0
            && state.load(StateField::IsPerforming) == 1
        {
            state.store_and_notify(StateField::IsPaused, 0);
            self.hs
                .apply_play_state(PlayState::RealtimePerformanceResumed);
        }
    }

    /// Stops any live performance, resets the engine, and returns the state
    /// words to the template.
    pub fn reset(&self) -> anyhow::Result<()> {
        if self.play_state().is_stopable() && self.stop() != 0 {
            bail!("failed to stop before reset");
        }
        let Some(runtime) = &self.runtime else {
            bail!("bridge is not initialized");
        };
        let uid = self.hs.uids.next();
        let pending = self.hs.return_queue.register(uid);
        runtime
            .control_tx
            .send(ControlRequest::Reset { uid })
            .context("worker disconnected")?;
        let value = pending.wait();
        if let ApiValue::Error(message) = value {
            bail!("engine reset failed: {message}");
        }
        self.hs.shared.state.reset_to_template();
        Ok(())
    }

    /// Appends one MIDI event to the shared ring; the worker drains it on
    /// its next wake.
    pub fn on_midi(&self, status: i32, data1: i32, data2: i32) {
        self.hs
            .shared
            .midi
            .produce(&self.hs.shared.state, status, data1, data2);
    }

    /// Routed engine entry point. While a performance is live the call is
    /// encoded into the callback ring and serviced by the worker's next
    /// wake; otherwise it takes the direct proxy round-trip.
    pub fn api(&self, op: Opcode, args: &[ApiArg]) -> ApiValue {
        let Some(runtime) = &self.runtime else {
            return ApiValue::error("bridge is not initialized");
        };
        let uid = self.hs.uids.next();
        let pending = self.hs.return_queue.register(uid);

        if self.play_state().is_performance_live() {
            let encode_result = {
                let _guard = self.hs.encode_lock.lock();
                rpc::encode_request(&self.hs.shared.callbacks, uid, op, args)
            };
            if let Err(err) = encode_result {
                self.hs
                    .return_queue
                    .fulfill(uid, ApiValue::error(err.to_string()));
            }
        } else if runtime
            .control_tx
            .send(ControlRequest::Api {
                uid,
                op,
                args: args.to_vec(),
            })
            .is_err()
        {
            self.hs
                .return_queue
                .fulfill(uid, ApiValue::error("worker disconnected"));
        }
        pending.wait()
    }

    // Typed wrappers over the routed namespace.

    pub fn set_option(&self, option: &str) -> ApiValue {
        self.api(Opcode::SetOption, &[ApiArg::from(option)])
    }

    pub fn eval_code(&self, code: &str) -> ApiValue {
        self.api(Opcode::EvalCode, &[ApiArg::from(code)])
    }

    pub fn compile_program(&self, code: &str) -> ApiValue {
        self.api(Opcode::CompileProgram, &[ApiArg::from(code)])
    }

    pub fn input_message(&self, text: &str) -> ApiValue {
        self.api(Opcode::InputMessage, &[ApiArg::from(text)])
    }

    pub fn score_event(&self, event: &str) -> ApiValue {
        self.api(Opcode::ScoreEvent, &[ApiArg::from(event)])
    }

    pub fn get_control_channel(&self, name: &str) -> ApiValue {
        self.api(Opcode::GetControlChannel, &[ApiArg::from(name)])
    }

    pub fn set_control_channel(&self, name: &str, value: f64) -> ApiValue {
        self.api(
            Opcode::SetControlChannel,
            &[ApiArg::from(name), ApiArg::from(value)],
        )
    }

    pub fn get_string_channel(&self, name: &str) -> ApiValue {
        self.api(Opcode::GetStringChannel, &[ApiArg::from(name)])
    }

    pub fn set_string_channel(&self, name: &str, value: &str) -> ApiValue {
        self.api(
            Opcode::SetStringChannel,
            &[ApiArg::from(name), ApiArg::from(value)],
        )
    }

    pub fn table_length(&self, table: i32) -> ApiValue {
        self.api(Opcode::TableLength, &[ApiArg::Int(table)])
    }

    pub fn table_get(&self, table: i32, index: i32) -> ApiValue {
        self.api(Opcode::TableGet, &[ApiArg::Int(table), ApiArg::Int(index)])
    }

    pub fn table_set(&self, table: i32, index: i32, value: f64) -> ApiValue {
        self.api(
            Opcode::TableSet,
            &[ApiArg::Int(table), ApiArg::Int(index), ApiArg::from(value)],
        )
    }

    pub fn get_score_time(&self) -> ApiValue {
        self.api(Opcode::GetScoreTime, &[])
    }

    // Callback registration. `set_*` replaces the list, `add_*` appends.

    pub fn set_message_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.hs.message_callbacks.lock() = vec![Box::new(callback)];
    }

    pub fn add_message_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.hs.message_callbacks.lock().push(Box::new(callback));
    }

    pub fn set_play_state_callback(&self, callback: impl Fn(PlayState) + Send + Sync + 'static) {
        *self.hs.play_state_callbacks.lock() = vec![Box::new(callback)];
    }

    pub fn add_play_state_callback(&self, callback: impl Fn(PlayState) + Send + Sync + 'static) {
        self.hs.play_state_callbacks.lock().push(Box::new(callback));
    }

    // The sandboxed filesystem namespace.

    pub fn write_to_fs(&self, path: &str, contents: &[u8]) -> Result<(), FsError> {
        self.fs.write_file(path, contents)
    }

    pub fn read_from_fs(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.fs.read_file(path)
    }

    pub fn ls_fs(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.fs.ls(path)
    }

    pub fn ll_fs(&self, path: &str) -> Result<Vec<FsEntry>, FsError> {
        self.fs.ll(path)
    }

    pub fn rmrf_fs(&self, path: &str) -> Result<(), FsError> {
        self.fs.rmrf(path)
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        if self.play_state().is_stopable() {
            let _ = self.stop();
        }
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.control_tx.send(ControlRequest::Shutdown);
            drop(runtime.control_tx);
            if runtime.worker.join().is_err() {
                tracing::error!("synthesis worker panicked");
            }
            if runtime.router.join().is_err() {
                tracing::error!("router thread panicked");
            }
        }
    }
}

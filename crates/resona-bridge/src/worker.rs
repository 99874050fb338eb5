//! The synthesis worker.
//!
//! Owns the engine instance for its whole life. Between performances it
//! services the control port; during a performance it runs one of the two
//! render loops and the host reaches it only through the shared region (the
//! state words and the callback ring).

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use resona_engine::{ApiValue, EngineFactory, SynthEngine};
use resona_rt::{SharedBuffers, StateField};

use crate::messages::{CallbackReply, ControlRequest, WorkerMessage};
use crate::play_state::PlayState;
use crate::rpc;

pub(crate) struct WorkerPorts {
    pub control_rx: Receiver<ControlRequest>,
    pub broadcast_tx: Sender<WorkerMessage>,
    pub reply_tx: Sender<CallbackReply>,
}

/// Spawns the worker thread. The factory runs on the new thread; its result
/// is reported once on `created_tx` before the control loop starts.
pub(crate) fn spawn(
    factory: EngineFactory,
    shared: Arc<SharedBuffers>,
    ports: WorkerPorts,
    created_tx: Sender<anyhow::Result<()>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("resona-synthesis".into())
        .spawn(move || {
            let engine = match factory() {
                Ok(engine) => {
                    let _ = created_tx.send(Ok(()));
                    engine
                }
                Err(err) => {
                    let _ = created_tx.send(Err(err));
                    return;
                }
            };
            Worker {
                engine,
                shared,
                ports,
                scratch: Vec::new(),
            }
            .run();
        })
}

struct Worker {
    engine: Box<dyn SynthEngine>,
    shared: Arc<SharedBuffers>,
    ports: WorkerPorts,
    scratch: Vec<i32>,
}

impl Worker {
    fn run(mut self) {
        while let Ok(request) = self.ports.control_rx.recv() {
            match request {
                ControlRequest::Start { render } => {
                    if render {
                        self.run_render();
                    } else {
                        self.run_realtime();
                    }
                }
                ControlRequest::Api { uid, op, args } => {
                    let value = self.engine.dispatch(op, &args);
                    self.flush_engine_messages();
                    self.reply(uid, value);
                }
                ControlRequest::Reset { uid } => {
                    self.engine.reset();
                    self.flush_engine_messages();
                    self.reply(uid, ApiValue::Unit);
                }
                ControlRequest::Shutdown => break,
            }
        }
        tracing::debug!("synthesis worker exiting");
    }

    /// Re-initializes the shared state from its template and publishes the
    /// engine's geometry for the host and the backend.
    fn publish_engine_state(&mut self) {
        let state = &self.shared.state;
        state.reset_to_template();
        state.store(StateField::Nchnls, self.engine.nchnls() as i32);
        // Capture stays disabled unless the engine's input is an ADC source.
        let nchnls_i = if self.engine.input_name().contains("adc") {
            self.engine.nchnls_i() as i32
        } else {
            0
        };
        state.store(StateField::NchnlsI, nchnls_i);
        state.store(StateField::SampleRate, self.engine.sr().round() as i32);
        state.store(StateField::Ksmps, self.engine.ksmps() as i32);
        state.store(
            StateField::IsRequestingRtmidi,
            i32::from(self.engine.is_requesting_rtmidi()),
        );
        state.store(StateField::IsPerforming, 1);
    }

    fn run_realtime(&mut self) {
        self.publish_engine_state();
        let wants_midi = self.engine.is_requesting_rtmidi();
        self.broadcast(WorkerMessage::PlayStateChange(
            PlayState::RealtimePerformanceStarted,
        ));

        let mut performance_ended = false;
        let mut last_return = 0i32;

        // The gate is deliberately an infinite loop: the doorbell wait only
        // paces it, and the checks below are the sole exits.
        loop {
            self.shared.state.wait_while(StateField::AtomicNotify, 0);

            if self.shared.state.load(StateField::Stop) == 1
                || self.shared.state.load(StateField::IsPerforming) != 1
                || performance_ended
            {
                if !performance_ended {
                    // Give the engine its shutdown block so closing log
                    // lines still come out.
                    self.engine.stop();
                    let _ = self.engine.perform_block();
                }
                break;
            }

            if self.shared.state.load(StateField::IsPaused) == 1 {
                self.shared.state.wait_while(StateField::IsPaused, 1);
                // Back to the top without re-arming: the doorbell is still
                // set from the wake that parked us, so a stop issued while
                // paused is seen before the rings are touched.
                continue;
            }

            if wants_midi {
                let engine = &mut self.engine;
                self.shared
                    .midi
                    .drain(&self.shared.state, |status, d1, d2| {
                        engine.push_midi(status, d1, d2)
                    });
            }

            self.drain_callbacks();
            self.copy_chunk(&mut performance_ended, &mut last_return);
            self.flush_engine_messages();

            // Re-arm the doorbell last; the backend's next store is a fresh
            // wake.
            self.shared.state.store(StateField::AtomicNotify, 0);

            // A stop that rang the doorbell while this wake was copying was
            // just consumed by the re-arm; restore it so the next wait
            // falls straight through to the stop check.
            if self.shared.state.load(StateField::Stop) == 1 {
                self.shared.state.store(StateField::AtomicNotify, 1);
            }
        }

        self.finish(PlayState::RealtimePerformanceEnded);
    }

    /// Offline variant: no doorbell, no rings; the engine free-runs until
    /// the score ends or the host stops it.
    fn run_render(&mut self) {
        self.publish_engine_state();
        self.broadcast(WorkerMessage::PlayStateChange(PlayState::RenderStarted));

        loop {
            if self.shared.state.load(StateField::Stop) == 1 {
                self.engine.stop();
                let _ = self.engine.perform_block();
                break;
            }
            if self.shared.state.load(StateField::IsPaused) == 1 {
                self.shared.state.wait_while(StateField::IsPaused, 1);
                continue;
            }
            self.drain_callbacks();
            let done = self.engine.perform_block() != 0;
            self.flush_engine_messages();
            if done {
                break;
            }
        }

        self.finish(PlayState::RenderEnded);
    }

    /// Copies `_b` frames between the engine block and the rings, performing
    /// whenever the output cursor crosses a block boundary.
    fn copy_chunk(&mut self, performance_ended: &mut bool, last_return: &mut i32) {
        let state = &self.shared.state;
        let chunk = state.load(StateField::SwBufferSize).max(1) as usize;
        let capacity = state.load(StateField::HwBufferSize).max(1) as usize;
        let nchnls = self.engine.nchnls();
        let nchnls_i = state.load(StateField::NchnlsI).max(0) as usize;
        let ksmps = self.engine.ksmps().max(1);
        let zero_dbfs = self.engine.zero_dbfs();

        let has_input = state.load(StateField::AvailInBufs) >= chunk as i32;
        let input_read = state.load(StateField::InputReadIndex) as usize;
        let output_write = state.load(StateField::OutputWriteIndex) as usize;

        for i in 0..chunk {
            let ci = (input_read + i) % capacity;
            let co = (output_write + i) % capacity;
            let pi = ci % ksmps;
            let po = co % ksmps;

            if po == 0 && !*performance_ended {
                if *last_return == 0 {
                    *last_return = self.engine.perform_block();
                } else {
                    *performance_ended = true;
                }
            }

            let spout = self.engine.spout();
            for channel in 0..nchnls {
                let sample = spout[po * nchnls + channel] / zero_dbfs;
                let sample = if sample.is_finite() { sample } else { 0.0 };
                self.shared.out_ring.write(channel, co, sample);
            }

            if has_input {
                let spin = self.engine.spin();
                for channel in 0..nchnls_i {
                    spin[pi * nchnls_i + channel] =
                        self.shared.in_ring.read(channel, ci) * zero_dbfs;
                }
                state.store(StateField::InputReadIndex, ((input_read + i + 1) % capacity) as i32);
            }
            state.store(
                StateField::OutputWriteIndex,
                ((output_write + i + 1) % capacity) as i32,
            );
        }

        if has_input {
            state.sub(StateField::AvailInBufs, chunk as i32);
        }
        state.add(StateField::AvailOutBufs, chunk as i32);
    }

    /// Drains the callback ring, dispatching each record to the engine and
    /// posting the result on the reply port. A failing call is reported on
    /// its uid and never aborts the loop.
    fn drain_callbacks(&mut self) {
        loop {
            match self.shared.callbacks.pop_record(&mut self.scratch) {
                Ok(true) => {
                    let (uid, decoded) = rpc::decode_record(&self.shared.callbacks, &self.scratch);
                    let value = match decoded {
                        Ok((op, args)) => self.engine.dispatch(op, &args),
                        Err(message) => {
                            tracing::warn!(uid, %message, "callback request rejected");
                            ApiValue::Error(message)
                        }
                    };
                    self.reply(uid, value);
                }
                Ok(false) => break,
                Err(err) => {
                    // Cannot step past a record whose length words are
                    // garbage; abandon the pending region. The host's
                    // terminal cleanup fulfills whatever was in it.
                    tracing::error!(%err, "corrupt callback ring, resynchronizing");
                    self.shared.callbacks.resync();
                    break;
                }
            }
        }
    }

    /// Fulfills whatever is still queued with a terminal tag, so no uid
    /// outlives the performance unanswered.
    fn drain_callbacks_terminal(&mut self) {
        while let Ok(true) = self.shared.callbacks.pop_record(&mut self.scratch) {
            let uid = self.scratch[0];
            self.reply(uid, ApiValue::error("performance ended"));
        }
    }

    /// Common end-of-performance path: flush everything, then broadcast the
    /// end state on the same port so the host observes logs first.
    fn finish(&mut self, end_state: PlayState) {
        self.shared.state.store(StateField::IsPerforming, 0);
        self.drain_callbacks_terminal();
        self.flush_engine_messages();
        self.broadcast(WorkerMessage::PlayStateChange(end_state));
    }

    fn flush_engine_messages(&mut self) {
        while let Some(line) = self.engine.poll_message() {
            self.broadcast(WorkerMessage::Log(line));
        }
    }

    fn broadcast(&self, message: WorkerMessage) {
        if self.ports.broadcast_tx.send(message).is_err() {
            tracing::warn!("broadcast port disconnected");
        }
    }

    fn reply(&self, uid: i32, value: ApiValue) {
        if self.ports.reply_tx.send(CallbackReply { uid, value }).is_err() {
            tracing::warn!(uid, "reply port disconnected");
        }
    }
}

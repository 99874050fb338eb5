//! The host-side message router.
//!
//! One thread owns both worker-facing receivers: the broadcast port (log
//! lines and play-state transitions) and the reply port (callback RPC
//! results). Broadcasts are applied in the order the worker produced them;
//! replies are keyed by uid and may interleave freely.

use std::sync::Arc;

use crossbeam_channel::{never, select, Receiver};

use crate::host::HostShared;
use crate::messages::{CallbackReply, WorkerMessage};

pub(crate) fn run(
    host: Arc<HostShared>,
    broadcast_rx: Receiver<WorkerMessage>,
    reply_rx: Receiver<CallbackReply>,
) {
    let mut broadcast_rx = broadcast_rx;
    let mut reply_rx = reply_rx;
    let mut broadcast_open = true;
    let mut reply_open = true;

    while broadcast_open || reply_open {
        select! {
            recv(broadcast_rx) -> message => match message {
                Ok(WorkerMessage::Log(line)) => host.dispatch_log(&line),
                Ok(WorkerMessage::PlayStateChange(state)) => host.apply_play_state(state),
                Err(_) => {
                    broadcast_open = false;
                    broadcast_rx = never();
                }
            },
            recv(reply_rx) -> reply => match reply {
                Ok(CallbackReply { uid, value }) => {
                    if !host.return_queue.fulfill(uid, value) {
                        tracing::warn!(uid, "reply for unknown uid dropped");
                    }
                }
                Err(_) => {
                    reply_open = false;
                    reply_rx = never();
                }
            },
        }
    }
    tracing::debug!("router thread exiting");
}

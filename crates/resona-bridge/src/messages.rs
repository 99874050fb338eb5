//! Port vocabulary between the control host and the synthesis worker.
//!
//! Three ports, all transferred at construction time: the control port
//! (host → worker), the broadcast port (worker → host: engine log lines and
//! play-state transitions), and the reply port (worker → host: callback RPC
//! results, keyed by uid).

use resona_engine::{ApiArg, ApiValue, Opcode};

use crate::play_state::PlayState;

/// Host → worker requests, serviced while the worker is idle between
/// performances. Performance-time API calls take the callback ring instead.
pub enum ControlRequest {
    /// Enter a performance loop; `render` selects the offline variant.
    Start { render: bool },
    /// Forward a routed entry point to the engine, blocking round-trip.
    Api {
        uid: i32,
        op: Opcode,
        args: Vec<ApiArg>,
    },
    /// Reset the engine to its just-created state.
    Reset { uid: i32 },
    /// Tear the worker down.
    Shutdown,
}

/// Worker → host broadcast messages. Ordering on this port is the ordering
/// the host observes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Log(String),
    PlayStateChange(PlayState),
}

/// Worker → host callback RPC reply. Replies may be reordered relative to
/// other traffic; the uid keys them back to their completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReply {
    pub uid: i32,
    pub value: ApiValue,
}

//! Resona's shared-memory transport core.
//!
//! A lock-free, cross-thread, real-time audio pipeline coordinating three
//! agents over one shared region: the control host (public API surface),
//! the synthesis worker (owns the engine, runs the render loop), and an
//! opaque audio backend (consumes the output ring, produces the input ring,
//! rings the doorbell). A callback RPC channel is overlaid on the region so
//! the host can keep issuing engine API calls while the worker holds the
//! render loop.
//!
//! ```no_run
//! use resona_bridge::{BridgeHost, BridgeOptions};
//! use resona_engine::SineEngine;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut host = BridgeHost::new(BridgeOptions::default())?;
//! host.initialize(Box::new(|| Ok(Box::new(SineEngine::new()))))?;
//! host.start();
//! host.set_control_channel("freq", 220.0);
//! host.stop();
//! # Ok(())
//! # }
//! ```

pub mod fs;
pub mod host;
pub mod messages;
pub mod play_state;
mod router;
pub mod rpc;
pub mod sink;
mod worker;

pub use fs::{FsEntry, FsError, SandboxFs};
pub use host::{BridgeHost, BridgeOptions};
pub use play_state::{PerformanceConfig, PlayState};
pub use sink::{AudioSink, NullSink};

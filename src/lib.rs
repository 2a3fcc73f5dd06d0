//! Deterministic lockstep synchronization over an unreliable datagram
//! transport.
//!
//! Every node builds one command per tic, sends the window its peers have
//! not acknowledged, and runs a tic only once every in-game node has
//! confirmed it. See [`session::Session`] for the entry point.

pub mod arbitrate;
pub mod clock;
pub mod config;
pub mod demo;
pub mod error;
pub mod fields;
pub mod ingest;
pub mod logger;
pub mod node;
pub mod pacer;
pub mod session;
pub mod sim;
pub mod special;
pub mod ticbuf;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod scenarios;

/// Tic number. Signed so window arithmetic can go below zero.
pub type Tic = i32;
/// Transport endpoint; node 0 is the local node.
pub type NodeId = usize;
/// Player slot, below `node::MAX_PLAYERS`.
pub type PlayerId = usize;

pub use arbitrate::{Arbitrator, GameInfo, Roster, StartupState, UserInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::NetError;
pub use pacer::TicOutcome;
pub use session::{Session, SessionConfig};
pub use sim::{PlayerInput, Simulation};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};

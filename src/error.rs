use thiserror::Error;

use crate::wire::WireError;
use crate::{NodeId, Tic};

/// Conditions that end a session. Loss, duplicates and corrupt packets are
/// handled internally and never show up here.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("killed by network driver (node {node})")]
    Killed { node: NodeId },

    #[error("protocol violation: {0}")]
    Protocol(#[from] WireError),

    #[error("different net protocol version (ours {ours}, theirs {theirs})")]
    VersionMismatch { ours: u8, theirs: u8 },

    #[error("tried to run tic {tic} with commands confirmed only below {lowtic}")]
    SimulationOverrun { tic: Tic, lowtic: Tic },

    #[error("lowtic {lowtic} fell behind gametic {gametic}")]
    LowTicBehindGameTic { lowtic: Tic, gametic: Tic },

    #[error("bad game settings: {0}")]
    Settings(#[from] bincode::Error),

    #[error("startup handshake has not finished")]
    StartupIncomplete,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;

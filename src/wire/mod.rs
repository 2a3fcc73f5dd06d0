// Wire protocol for per-tic lockstep packets
// Layout, flag bits and checksum live here; the special-command record table
// is in crate::special because the rest of the game writes into it.

pub mod checksum;
pub mod cursor;
pub mod packet;
pub mod usercmd;

use thiserror::Error;

pub use checksum::{compute_checksum, NCMD_CHECKSUM};
pub use cursor::{Reader, Writer};
pub use packet::{
    expand_tics, netbuffer_size, read_tic_cmd, skip_tic_cmds, write_tic_cmd, Packet,
    PacketHeader, HEADER_SIZE, MAX_MSGLEN, NCMD_EXIT, NCMD_KILL,
    NCMD_RETRANSMIT, NCMD_SETUP, PL_DRONE,
};
pub use usercmd::{pack_user_cmd, skip_user_cmd, unpack_user_cmd, TicCmd, UserCmd};

/// Errors raised while encoding or decoding packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated record: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("packet of {0} bytes is shorter than the header")]
    TooShort(usize),

    #[error("bad packet checksum: expected {expected:#09x}, got {actual:#09x}")]
    BadChecksum { expected: u32, actual: u32 },

    #[error("bad packet length {actual} (should be {expected})")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unknown net command: {0}")]
    UnknownSpecial(u8),

    #[error("netbuffer overflow: {0} bytes")]
    TooLarge(usize),
}

impl WireError {
    /// Corruption is dropped silently; anything else ends the session.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, WireError::UnknownSpecial(_) | WireError::TooLarge(_))
    }
}

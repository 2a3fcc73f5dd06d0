// Per-node synchronization bookkeeping

use crate::{PlayerId, Tic};

pub const MAX_NODES: usize = 8;
pub const MAX_PLAYERS: usize = 8;

/// Retransmit requests ignored after one has been honored.
pub const RESEND_COOLDOWN: i32 = 10;

/// Where a received tic window falls relative to what the node already sent us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Ends exactly at the watermark.
    Duplicate,
    /// Ends before the watermark.
    Stale,
    /// Starts past the watermark; tics are missing in between.
    Gap,
    /// Overlaps or abuts the watermark. The first `already_have` tics are
    /// known and must be skipped.
    Fresh { already_have: usize },
}

#[derive(Debug, Clone, Default)]
pub struct NodeState {
    /// Every tic below this has been received from the node.
    pub highest_tic_received: Tic,
    pub in_game: bool,
    /// We saw a gap and must ask the node to resend.
    pub needs_resend: bool,
    /// First tic of the next packet we send to the node.
    pub resend_from: Tic,
    pub resend_cooldown: i32,
    pub player: Option<PlayerId>,
}

impl NodeState {
    pub fn new(in_game: bool) -> Self {
        Self {
            in_game,
            ..Default::default()
        }
    }

    /// Applies the retransmit bit of an incoming packet. Returns true when
    /// the request was honored and `resend_from` moved.
    pub fn note_retransmit_request(&mut self, from: Option<Tic>) -> bool {
        match from {
            Some(tic) if self.resend_cooldown <= 0 => {
                self.resend_from = tic;
                self.resend_cooldown = RESEND_COOLDOWN;
                true
            }
            _ => {
                self.resend_cooldown = self.resend_cooldown.saturating_sub(1);
                false
            }
        }
    }

    pub fn classify(&self, start: Tic, end: Tic) -> Arrival {
        let mark = self.highest_tic_received;
        if end == mark {
            Arrival::Duplicate
        } else if end < mark {
            Arrival::Stale
        } else if start > mark {
            Arrival::Gap
        } else {
            Arrival::Fresh {
                already_have: (mark - start) as usize,
            }
        }
    }
}

// Tic-indexed ring buffers

use crate::node::MAX_PLAYERS;
use crate::special::SpecialCommand;
use crate::wire::TicCmd;
use crate::{PlayerId, Tic};

/// Capacity of every tic ring. A peer more than this many tics behind can
/// no longer be served from the local buffer.
pub const BACKUPTICS: usize = 36;

/// Fixed ring addressed by absolute tic number.
#[derive(Debug, Clone)]
pub struct TicRing<T> {
    slots: Vec<T>,
}

impl<T: Clone + Default> Default for TicRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> TicRing<T> {
    pub fn new() -> Self {
        Self {
            slots: vec![T::default(); BACKUPTICS],
        }
    }

    fn index(tic: Tic) -> usize {
        tic.rem_euclid(BACKUPTICS as Tic) as usize
    }

    pub fn get(&self, tic: Tic) -> &T {
        &self.slots[Self::index(tic)]
    }

    pub fn get_mut(&mut self, tic: Tic) -> &mut T {
        &mut self.slots[Self::index(tic)]
    }

    pub fn set(&mut self, tic: Tic, value: T) {
        self.slots[Self::index(tic)] = value;
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = T::default());
    }
}

/// A received command and the special records that rode with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteTic {
    pub cmd: TicCmd,
    pub specials: Vec<SpecialCommand>,
}

/// Per-player rings of confirmed commands, read by the simulation.
#[derive(Debug, Clone)]
pub struct RemoteCommandTable {
    players: Vec<TicRing<RemoteTic>>,
}

impl Default for RemoteCommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteCommandTable {
    pub fn new() -> Self {
        Self {
            players: (0..MAX_PLAYERS).map(|_| TicRing::new()).collect(),
        }
    }

    pub fn store(&mut self, player: PlayerId, tic: Tic, cmd: TicCmd, specials: Vec<SpecialCommand>) {
        self.players[player].set(tic, RemoteTic { cmd, specials });
    }

    pub fn get(&self, player: PlayerId, tic: Tic) -> &RemoteTic {
        self.players[player].get(tic)
    }

    pub fn clear_player(&mut self, player: PlayerId) {
        self.players[player].clear();
    }
}

/// Fingerprints this node recorded per player, compared against the
/// consistency word carried by later commands for the same slot.
#[derive(Debug, Clone)]
pub struct ConsistencyLedger {
    players: Vec<TicRing<u16>>,
}

impl Default for ConsistencyLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistencyLedger {
    pub fn new() -> Self {
        Self {
            players: (0..MAX_PLAYERS).map(|_| TicRing::new()).collect(),
        }
    }

    pub fn get(&self, player: PlayerId, tic: Tic) -> u16 {
        *self.players[player].get(tic)
    }

    pub fn record(&mut self, player: PlayerId, tic: Tic, fingerprint: u16) {
        self.players[player].set(tic, fingerprint);
    }
}

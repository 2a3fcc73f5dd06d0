// Simulation seam: what the engine needs from the game it drives

use crate::special::{SpecialCommand, SpecialStream};
use crate::wire::{TicCmd, UserCmd};
use crate::{PlayerId, Tic};

/// One in-game player's confirmed input for the tic being run.
#[derive(Debug, Clone, Copy)]
pub struct PlayerInput<'a> {
    pub player: PlayerId,
    pub cmd: &'a TicCmd,
    /// Only populated on the first duplicate of a command tic.
    pub specials: &'a [SpecialCommand],
}

pub trait Simulation {
    /// Samples local input for command tic `tic`. Anything written to
    /// `specials` rides along with that tic.
    fn build_local_command(&mut self, tic: Tic, specials: &mut SpecialStream) -> UserCmd;

    /// Advances one simulation step. `gametic` counts steps, not command tics.
    fn run_tic(&mut self, gametic: Tic, inputs: &[PlayerInput<'_>]);

    /// Small checksum of the player's simulation state.
    fn consistency_fingerprint(&self, player: PlayerId) -> u16;

    /// Called once when a player leaves mid-session.
    fn remove_player(&mut self, _player: PlayerId) {}
}

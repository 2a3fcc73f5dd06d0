// Tiny deterministic game used by the node binary
//
// Every player is a point that moves by its input each tic. Local input is a
// seeded random walk with an occasional chat line on the special channel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::fields;
use crate::node::MAX_PLAYERS;
use crate::sim::{PlayerInput, Simulation};
use crate::special::{SpecialCommand, SpecialStream};
use crate::wire::UserCmd;
use crate::{PlayerId, Tic};

const CHAT_INTERVAL: Tic = 175;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Actor {
    present: bool,
    x: i32,
    y: i32,
    angle: i16,
    deaths: u16,
}

pub struct DemoSim {
    console_player: PlayerId,
    rng: StdRng,
    actors: [Actor; MAX_PLAYERS],
    last_tic: Tic,
}

impl DemoSim {
    pub fn new(console_player: PlayerId, seed: u32, players: impl IntoIterator<Item = PlayerId>) -> Self {
        let mut actors = [Actor::default(); MAX_PLAYERS];
        for p in players {
            if let Some(actor) = actors.get_mut(p) {
                actor.present = true;
                actor.x = p as i32 * 64;
            }
        }
        Self {
            console_player,
            rng: StdRng::seed_from_u64(u64::from(seed) ^ ((console_player as u64) << 32)),
            actors,
            last_tic: -1,
        }
    }

    pub fn last_tic(&self) -> Tic {
        self.last_tic
    }

    pub fn position(&self, player: PlayerId) -> Option<(i32, i32)> {
        let actor = self.actors.get(player)?;
        actor.present.then_some((actor.x, actor.y))
    }
}

impl Simulation for DemoSim {
    fn build_local_command(&mut self, tic: Tic, specials: &mut SpecialStream) -> UserCmd {
        if tic > 0 && tic % CHAT_INTERVAL == 0 {
            specials.write_command(&SpecialCommand::Say {
                who: 0,
                text: format!("still here at tic {}", tic),
            });
        }
        UserCmd {
            buttons: u8::from(self.rng.gen_bool(0.1)),
            yaw: self.rng.gen_range(-64..=64),
            forward_move: self.rng.gen_range(-50..=50),
            side_move: self.rng.gen_range(-40..=40),
            ..Default::default()
        }
    }

    fn run_tic(&mut self, gametic: Tic, inputs: &[PlayerInput<'_>]) {
        for input in inputs {
            let Some(actor) = self.actors.get_mut(input.player) else {
                continue;
            };
            for special in input.specials {
                match special {
                    SpecialCommand::Say { text, .. } => {
                        info!({ fields::PLAYER } = input.player, text = %text, "Chat");
                    }
                    SpecialCommand::Suicide => {
                        actor.x = 0;
                        actor.y = 0;
                        actor.deaths = actor.deaths.wrapping_add(1);
                    }
                    other => debug!({ fields::PLAYER } = input.player, ?other, "Ignored special"),
                }
            }

            let ucmd = &input.cmd.ucmd;
            actor.angle = actor.angle.wrapping_add(ucmd.yaw);
            actor.x = actor.x.wrapping_add(i32::from(ucmd.forward_move));
            actor.y = actor.y.wrapping_add(i32::from(ucmd.side_move));
            if ucmd.buttons & 1 != 0 {
                actor.x = actor.x.wrapping_add(i32::from(actor.angle) >> 8);
            }
        }
        self.last_tic = gametic;
    }

    fn consistency_fingerprint(&self, player: PlayerId) -> u16 {
        let Some(actor) = self.actors.get(player) else {
            return 0;
        };
        let mixed = (actor.x as u32)
            ^ (actor.y as u32).rotate_left(11)
            ^ u32::from(actor.angle as u16).rotate_left(5)
            ^ u32::from(actor.deaths);
        (mixed ^ (mixed >> 16)) as u16
    }

    fn remove_player(&mut self, player: PlayerId) {
        if let Some(actor) = self.actors.get_mut(player) {
            *actor = Actor::default();
        }
        if player == self.console_player {
            debug!("Local player removed");
        }
    }
}

// Frame pacing
//
// net_update builds local commands for the real time that has passed and
// sends every in-game node the window it has not acknowledged yet.
// try_run_tics decides how many command tics this frame may run and runs
// them once every node has confirmed them.

use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{NetError, Result};
use crate::fields;
use crate::node::MAX_PLAYERS;
use crate::session::Session;
use crate::sim::{PlayerInput, Simulation};
use crate::special::decode_specials;
use crate::ticbuf::BACKUPTICS;
use crate::transport::Transport;
use crate::wire::{write_tic_cmd, Packet, PacketHeader, TicCmd, Writer, NCMD_RETRANSMIT};
use crate::Tic;

/// Real tics a frame may wait for peers before giving up.
pub const STALL_BUDGET: Tic = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicOutcome {
    /// Ran this many command tics.
    Ran(usize),
    /// Commands are not confirmed yet; call again soon.
    Waiting,
    /// Waited `STALL_BUDGET` real tics without progress; the frame is over.
    Stalled,
}

/// A frame whose tic count is decided but which is still waiting for peers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingRun {
    counts: Tic,
    entertic: Tic,
}

impl<T: Transport, C: Clock> Session<T, C> {
    /// Builds new local commands, sends them, then reads the network.
    pub fn net_update<S: Simulation>(&mut self, sim: &mut S) -> Result<()> {
        let now = self.clock.now() / self.config.ticdup;
        let mut new_tics = now - self.gametime;
        self.gametime = now;

        if new_tics > 0 {
            if self.skiptics <= new_tics {
                new_tics -= self.skiptics;
                self.skiptics = 0;
            } else {
                self.skiptics -= new_tics;
                new_tics = 0;
            }

            self.make_tics(new_tics, sim)?;
            if self.config.single_tics {
                return Ok(());
            }
            self.send_tics(sim)?;
        }

        self.get_packets(sim)
    }

    fn make_tics<S: Simulation>(&mut self, new_tics: Tic, sim: &mut S) -> Result<()> {
        let gameticdiv = self.gametic / self.config.ticdup;
        let console = self.roster.console_player;

        for _ in 0..new_tics {
            if self.maketic - gameticdiv >= BACKUPTICS as Tic / 2 - 1 {
                trace!(
                    { fields::MAKETIC } = self.maketic,
                    { fields::GAMETIC } = self.gametic,
                    "Local buffer full"
                );
                break;
            }

            let tic = self.maketic;
            let ucmd = sim.build_local_command(tic, &mut self.specials);
            let cmd = TicCmd::new(self.consistency.get(console, tic), ucmd);
            self.local_cmds.set(tic, cmd);
            self.maketic += 1;
            self.specials.begin_tic(self.maketic);

            if self.config.single_tics {
                let specials = decode_specials(self.specials.drain(tic))?;
                self.net_cmds.store(console, tic, cmd, specials);
                self.nodes[0].highest_tic_received = self.maketic;
            }
        }
        Ok(())
    }

    fn send_tics<S: Simulation>(&mut self, sim: &mut S) -> Result<()> {
        let maketic = self.maketic;
        for node in 0..self.nodes.len() {
            if !self.nodes[node].in_game {
                continue;
            }

            let start = self.nodes[node].resend_from.clamp(0, maketic);
            let num_tics = maketic - start;
            if num_tics > BACKUPTICS as Tic {
                warn!(
                    { fields::NODE } = node,
                    { fields::START_TIC } = start,
                    { fields::MAKETIC } = maketic,
                    "Node fell too far behind"
                );
                self.drop_node(node, sim, "too far behind");
                continue;
            }
            self.nodes[node].resend_from = (maketic - self.config.extra_tics).max(0);

            let mut w = Writer::new();
            for tic in start..maketic {
                write_tic_cmd(&mut w, self.local_cmds.get(tic), self.specials.drain(tic));
            }

            let state = &self.nodes[node];
            let (flags, retransmit_from) = if state.needs_resend {
                (NCMD_RETRANSMIT, (state.highest_tic_received & 0xff) as u8)
            } else {
                (0, 0)
            };
            let packet = Packet::new(
                PacketHeader {
                    flags,
                    retransmit_from,
                    start_tic: (start & 0xff) as u8,
                    player: self.roster.console_player as u8,
                    num_tics: num_tics as u8,
                },
                w.into_vec(),
            );
            trace!(
                { fields::NODE } = node,
                { fields::START_TIC } = start,
                { fields::NUM_TICS } = num_tics,
                "Sending tics"
            );
            self.send_packet(node, &packet)?;
        }
        Ok(())
    }

    /// Runs as many confirmed tics as this frame allows.
    ///
    /// `Waiting` keeps the frame open: the caller should poll again after
    /// yielding. After `STALL_BUDGET` real tics the frame is abandoned with
    /// `Stalled` so the caller can service its UI.
    pub fn try_run_tics<S: Simulation>(&mut self, sim: &mut S) -> Result<TicOutcome> {
        let ticdup = self.config.ticdup;
        let pending = match self.pending.take() {
            Some(pending) => {
                self.net_update(sim)?;
                pending
            }
            None => self.plan_frame(sim)?,
        };

        let gameticdiv = self.gametic / ticdup;
        let lowtic = self.low_tic();
        if lowtic < gameticdiv {
            return Err(NetError::LowTicBehindGameTic {
                lowtic,
                gametic: self.gametic,
            });
        }

        if lowtic < gameticdiv + pending.counts {
            if self.clock.now() / ticdup - pending.entertic >= STALL_BUDGET {
                self.stats.stalls += 1;
                debug!(
                    { fields::LOWTIC } = lowtic,
                    { fields::GAMETIC } = self.gametic,
                    "Gave up waiting for tics"
                );
                return Ok(TicOutcome::Stalled);
            }
            self.pending = Some(pending);
            return Ok(TicOutcome::Waiting);
        }

        for _ in 0..pending.counts {
            for dup in 0..ticdup {
                let tic = self.gametic / ticdup;
                let lowtic = self.low_tic();
                if tic >= lowtic {
                    return Err(NetError::SimulationOverrun { tic, lowtic });
                }
                self.run_one_tic(sim, dup == 0);
                self.gametic += 1;
            }
            self.net_update(sim)?;
        }
        Ok(TicOutcome::Ran(pending.counts as usize))
    }

    fn plan_frame<S: Simulation>(&mut self, sim: &mut S) -> Result<PendingRun> {
        let ticdup = self.config.ticdup;
        let entertic = self.clock.now() / ticdup;
        let realtics = entertic - self.oldentertics;
        self.oldentertics = entertic;

        self.net_update(sim)?;

        let available = self.low_tic() - self.gametic / ticdup;
        let counts = if realtics < available - 1 {
            realtics + 1
        } else if realtics < available {
            realtics
        } else {
            available
        };

        self.frameon += 1;
        self.compensate_drift();

        trace!(
            realtics,
            available,
            counts = counts.max(1),
            "Frame planned"
        );
        Ok(PendingRun {
            counts: counts.max(1),
            entertic,
        })
    }

    /// Nodes other than the arbitrator follow its pace: falling behind
    /// earns an extra tic, running ahead votes to skip one.
    fn compensate_drift(&mut self) {
        if self.roster.console_player == self.arbitrator {
            return;
        }
        let Some(arb_node) = self.node_for_player[self.arbitrator] else {
            return;
        };
        let arb_tics = self.nodes[arb_node].highest_tic_received;
        let local_tics = self.nodes[0].highest_tic_received;

        if local_tics <= arb_tics {
            self.gametime -= 1;
        }
        self.frameskip[self.frameon & (MAX_PLAYERS - 1)] = self.oldnettics > arb_tics;
        self.oldnettics = local_tics;

        self.skiptics = Tic::from(self.frameskip.iter().all(|&skip| skip));
    }

    fn run_one_tic<S: Simulation>(&mut self, sim: &mut S, first_dup: bool) {
        let tic = self.gametic / self.config.ticdup;

        if first_dup {
            for player in 0..MAX_PLAYERS {
                if !self.player_in_game[player] {
                    continue;
                }
                let carried = self.net_cmds.get(player, tic).cmd.consistency;
                if tic >= BACKUPTICS as Tic {
                    let expected = self.consistency.get(player, tic);
                    if expected != carried {
                        self.stats.desyncs += 1;
                        warn!(
                            { fields::PLAYER } = player,
                            { fields::TIC } = tic,
                            expected,
                            carried,
                            "Consistency failure"
                        );
                    }
                }
                self.consistency
                    .record(player, tic, sim.consistency_fingerprint(player));
            }
        }

        let inputs: Vec<PlayerInput<'_>> = (0..MAX_PLAYERS)
            .filter(|&p| self.player_in_game[p])
            .map(|player| {
                let remote = self.net_cmds.get(player, tic);
                PlayerInput {
                    player,
                    cmd: &remote.cmd,
                    specials: if first_dup { &remote.specials } else { &[] },
                }
            })
            .collect();
        sim.run_tic(self.gametic, &inputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrate::{GameInfo, Roster, UserInfo};
    use crate::clock::ManualClock;
    use crate::session::SessionConfig;
    use crate::special::{SpecialCommand, SpecialStream};
    use crate::transport::{MemoryNetwork, MemoryTransport};
    use crate::wire::UserCmd;

    #[derive(Default)]
    struct CountingSim {
        built: Vec<Tic>,
        ran: Vec<(Tic, Vec<(usize, UserCmd, usize)>)>,
        say_at: Option<Tic>,
    }

    impl Simulation for CountingSim {
        fn build_local_command(&mut self, tic: Tic, specials: &mut SpecialStream) -> UserCmd {
            self.built.push(tic);
            if self.say_at == Some(tic) {
                specials.write_command(&SpecialCommand::Say {
                    who: 0,
                    text: "hi".into(),
                });
            }
            UserCmd {
                side_move: tic as i16,
                ..Default::default()
            }
        }

        fn run_tic(&mut self, gametic: Tic, inputs: &[PlayerInput<'_>]) {
            self.ran.push((
                gametic,
                inputs
                    .iter()
                    .map(|i| (i.player, i.cmd.ucmd, i.specials.len()))
                    .collect(),
            ));
        }

        fn consistency_fingerprint(&self, _player: usize) -> u16 {
            self.ran.len() as u16
        }
    }

    fn game() -> GameInfo {
        GameInfo {
            map: "MAP01".into(),
            rng_seed: 1,
            settings: Vec::new(),
        }
    }

    fn solo(config: SessionConfig) -> (ManualClock, Session<MemoryTransport, ManualClock>) {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(1, clock.clone(), 1);
        let session = Session::new(
            net.endpoint(0),
            clock.clone(),
            config,
            Roster::solo(UserInfo::default(), game()),
        )
        .unwrap();
        (clock, session)
    }

    fn pair(
        console_player: usize,
        node_players: Vec<usize>,
    ) -> (ManualClock, Session<MemoryTransport, ManualClock>) {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(2, clock.clone(), 1);
        let mut roster = Roster::solo(UserInfo::default(), game());
        roster.console_player = console_player;
        roster.node_players = node_players;
        let session =
            Session::new(net.endpoint(0), clock.clone(), SessionConfig::default(), roster)
                .unwrap();
        (clock, session)
    }

    #[test]
    fn test_solo_loopback_runs_every_tic() {
        let (clock, mut s) = solo(SessionConfig::default());
        let mut sim = CountingSim::default();
        for _ in 0..50 {
            clock.advance(1);
            assert!(matches!(s.try_run_tics(&mut sim).unwrap(), TicOutcome::Ran(_)));
        }
        assert_eq!(s.gametic(), sim.ran.len() as Tic);
        assert!(s.gametic() >= 49);
        for (gametic, inputs) in &sim.ran {
            assert_eq!(inputs[0].1.side_move, *gametic as i16);
        }
        assert_eq!(s.stats().desyncs, 0);
    }

    #[test]
    fn test_single_tics_skip_the_network() {
        let config = SessionConfig {
            single_tics: true,
            ..Default::default()
        };
        let (clock, mut s) = solo(config);
        let mut sim = CountingSim {
            say_at: Some(2),
            ..Default::default()
        };
        for _ in 0..10 {
            clock.advance(1);
            s.try_run_tics(&mut sim).unwrap();
        }
        assert!(s.rebound.is_none());
        assert_eq!(
            s.net_cmd(0, 2).specials,
            vec![SpecialCommand::Say {
                who: 0,
                text: "hi".into()
            }]
        );
        let ran_say: Vec<_> = sim.ran.iter().filter(|(_, i)| i[0].2 == 1).collect();
        assert_eq!(ran_say.len(), 1);
        assert_eq!(ran_say[0].0, 2);
    }

    #[test]
    fn test_ticdup_runs_each_command_several_times() {
        let config = SessionConfig {
            ticdup: 2,
            ..Default::default()
        };
        let (clock, mut s) = solo(config);
        let mut sim = CountingSim {
            say_at: Some(1),
            ..Default::default()
        };
        for _ in 0..20 {
            clock.advance(1);
            s.try_run_tics(&mut sim).unwrap();
        }
        assert_eq!(s.gametic() % 2, 0);
        for pair in sim.ran.chunks(2) {
            assert_eq!(pair[0].1[0].1, pair[1].1[0].1);
            // Specials only on the first duplicate.
            assert_eq!(pair[1].1[0].2, 0);
        }
        assert_eq!(sim.ran[2].1[0].2, 1);
    }

    #[test]
    fn test_backpressure_limits_lead() {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(2, clock.clone(), 1);
        let mut roster = Roster::solo(UserInfo::default(), game());
        roster.node_players = vec![0, 1];
        let mut s = Session::new(net.endpoint(0), clock.clone(), SessionConfig::default(), roster)
            .unwrap();
        let mut sim = CountingSim::default();

        // The peer never answers: we must stop building at half the ring.
        clock.advance(100);
        s.net_update(&mut sim).unwrap();
        assert_eq!(s.maketic(), BACKUPTICS as Tic / 2 - 1);
        assert_eq!(s.try_run_tics(&mut sim).unwrap(), TicOutcome::Waiting);
        clock.advance(STALL_BUDGET);
        assert_eq!(s.try_run_tics(&mut sim).unwrap(), TicOutcome::Stalled);
        assert_eq!(s.gametic(), 0);
        assert_eq!(s.stats().stalls, 1);
    }

    #[test]
    fn test_skip_debt_is_paid_first() {
        let (clock, mut s) = solo(SessionConfig::default());
        let mut sim = CountingSim::default();
        s.skiptics = 2;
        clock.advance(3);
        s.net_update(&mut sim).unwrap();
        assert_eq!(s.maketic(), 1);
        assert_eq!(s.skiptics, 0);
    }

    #[test]
    fn test_resend_window_covers_extra_tics() {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(2, clock.clone(), 1);
        let mut roster = Roster::solo(UserInfo::default(), game());
        roster.node_players = vec![0, 1];
        let config = SessionConfig {
            extra_tics: 2,
            ..Default::default()
        };
        let mut s = Session::new(net.endpoint(0), clock.clone(), config, roster).unwrap();
        let mut peer = net.endpoint(1);
        let mut sim = CountingSim::default();

        clock.advance(5);
        s.net_update(&mut sim).unwrap();
        clock.advance(1);
        s.net_update(&mut sim).unwrap();

        let mut windows = Vec::new();
        while let Some((_, bytes)) = peer.try_receive().unwrap() {
            let p = Packet::decode(&bytes).unwrap();
            windows.push((p.header.start_tic, p.header.num_tics));
        }
        assert_eq!(windows, vec![(0, 5), (3, 3)]);
    }

    #[test]
    fn test_node_too_far_behind_is_dropped() {
        let (clock, mut s) = pair(0, vec![0, 1]);
        let mut sim = CountingSim::default();
        s.maketic = 100;
        s.gametic = 90;
        s.nodes[0].resend_from = 95;
        s.nodes[1].resend_from = 50;

        clock.advance(1);
        s.net_update(&mut sim).unwrap();
        assert!(!s.node(1).unwrap().in_game);
        assert!(!s.is_player_in_game(1));
        assert!(s.node(0).unwrap().in_game);
        assert_eq!(s.players_in_game().count(), 1);
    }

    #[test]
    fn test_skip_needs_every_vote() {
        // Player 1 runs here; the arbitrator (player 0) sits on node 1.
        let (_clock, mut s) = pair(1, vec![1, 0]);
        s.nodes[1].highest_tic_received = 5;
        s.nodes[0].highest_tic_received = 10;
        s.oldnettics = 10;
        let gametime = s.gametime;

        for frame in 0..MAX_PLAYERS {
            s.frameon = frame;
            s.compensate_drift();
            assert_eq!(s.skiptics, Tic::from(frame == MAX_PLAYERS - 1), "frame {}", frame);
        }
        assert_eq!(s.gametime, gametime);

        // Falling behind the arbitrator earns a tic; one dissenting slot
        // cancels the skip.
        s.nodes[0].highest_tic_received = 3;
        s.frameon = MAX_PLAYERS;
        s.compensate_drift();
        assert_eq!(s.gametime, gametime - 1);
        assert_eq!(s.skiptics, 1);
        s.frameon += 1;
        s.compensate_drift();
        assert_eq!(s.gametime, gametime - 2);
        assert_eq!(s.skiptics, 0);
    }

    #[test]
    fn test_arbitrator_never_skips() {
        let (_clock, mut s) = pair(0, vec![0, 1]);
        s.frameskip = [true; MAX_PLAYERS];
        s.oldnettics = 1000;
        s.nodes[0].highest_tic_received = 1000;
        let gametime = s.gametime;
        for frame in 0..MAX_PLAYERS {
            s.frameon = frame;
            s.compensate_drift();
            assert_eq!(s.skiptics, 0);
        }
        assert_eq!(s.gametime, gametime);
    }
}

// Multi-node runs over the in-memory network

use crate::arbitrate::{Arbitrator, GameInfo, Roster, StartupState, UserInfo};
use crate::clock::ManualClock;
use crate::pacer::TicOutcome;
use crate::session::{Session, SessionConfig};
use crate::sim::{PlayerInput, Simulation};
use crate::special::SpecialStream;
use crate::transport::{MemoryNetwork, MemoryTransport};
use crate::wire::UserCmd;
use crate::{PlayerId, Tic};

type Node = Session<MemoryTransport, ManualClock>;

/// Input is a pure function of player and tic so every node can check what
/// it ran against what the owner produced.
fn produced(player: PlayerId, tic: Tic) -> UserCmd {
    UserCmd {
        forward_move: (tic % 97) as i16 - 48,
        side_move: player as i16 * 10,
        yaw: (tic * 7 % 31) as i16,
        buttons: (tic % 3 == 0) as u8,
        ..Default::default()
    }
}

struct RecordingSim {
    console_player: PlayerId,
    executed: Vec<(Tic, Vec<(PlayerId, UserCmd)>)>,
    totals: [i32; 8],
}

impl RecordingSim {
    fn new(console_player: PlayerId) -> Self {
        Self {
            console_player,
            executed: Vec::new(),
            totals: [0; 8],
        }
    }
}

impl Simulation for RecordingSim {
    fn build_local_command(&mut self, tic: Tic, _specials: &mut SpecialStream) -> UserCmd {
        produced(self.console_player, tic)
    }

    fn run_tic(&mut self, gametic: Tic, inputs: &[PlayerInput<'_>]) {
        for input in inputs {
            let cmd = &input.cmd.ucmd;
            self.totals[input.player] = self.totals[input.player]
                .wrapping_mul(31)
                .wrapping_add(i32::from(cmd.forward_move) + i32::from(cmd.yaw));
        }
        self.executed.push((
            gametic,
            inputs.iter().map(|i| (i.player, i.cmd.ucmd)).collect(),
        ));
    }

    fn consistency_fingerprint(&self, player: PlayerId) -> u16 {
        self.totals[player] as u16
    }
}

fn game() -> GameInfo {
    GameInfo {
        map: "MAP07".into(),
        rng_seed: 42,
        settings: Vec::new(),
    }
}

/// Endpoint `me` hosts player `me`; its nodes follow the transport order.
fn mesh(
    net: &MemoryNetwork,
    clock: &ManualClock,
    count: usize,
    config: SessionConfig,
) -> Vec<(Node, RecordingSim)> {
    (0..count)
        .map(|me| {
            let mut roster = Roster::solo(UserInfo::default(), game());
            roster.console_player = me;
            roster.node_players = std::iter::once(me)
                .chain((0..count).filter(|&p| p != me))
                .collect();
            let session = Session::new(
                net.endpoint(me),
                clock.clone(),
                config,
                roster,
            )
            .unwrap();
            (session, RecordingSim::new(me))
        })
        .collect()
}

fn run_frames(clock: &ManualClock, nodes: &mut [(Node, RecordingSim)], frames: usize) {
    for _ in 0..frames {
        clock.advance(1);
        for (session, sim) in nodes.iter_mut() {
            let outcome = session.try_run_tics(sim).unwrap();
            assert_ne!(outcome, TicOutcome::Ran(0));
            assert!(session.gametic() / session.config().ticdup <= session.low_tic());
        }
    }
}

fn assert_inputs_match_producers(nodes: &[(Node, RecordingSim)]) {
    for (_, sim) in nodes {
        for (gametic, inputs) in &sim.executed {
            for (player, cmd) in inputs {
                assert_eq!(*cmd, produced(*player, *gametic), "player {} tic {}", player, gametic);
            }
        }
    }
    let shortest = nodes.iter().map(|(_, s)| s.executed.len()).min().unwrap_or(0);
    for (_, sim) in &nodes[1..] {
        assert_eq!(sim.executed[..shortest], nodes[0].1.executed[..shortest]);
    }
}

#[test]
fn test_lossy_pair_recovers_every_tic() {
    let clock = ManualClock::new();
    let net = MemoryNetwork::new(2, clock.clone(), 0x5eed);
    let mut nodes = mesh(&net, &clock, 2, SessionConfig::default());

    net.set_loss(0.3);
    run_frames(&clock, &mut nodes, 400);
    net.set_loss(0.0);
    run_frames(&clock, &mut nodes, 100);

    assert!(net.dropped() > 0);
    for (session, sim) in &nodes {
        assert!(session.gametic() > 50);
        assert_eq!(sim.executed.len() as Tic, session.gametic());
        assert_eq!(session.stats().desyncs, 0);
        assert_eq!(session.players_in_game().count(), 2);
    }
    assert_inputs_match_producers(&nodes);
}

#[test]
fn test_slow_node_keeps_everyone_in_step() {
    let clock = ManualClock::new();
    let net = MemoryNetwork::new(3, clock.clone(), 11);
    net.set_delay(2, 3);
    let config = SessionConfig {
        extra_tics: 3,
        ..Default::default()
    };
    let mut nodes = mesh(&net, &clock, 3, config);

    run_frames(&clock, &mut nodes, 100);
    for frame in 0..500 {
        run_frames(&clock, &mut nodes, 1);
        let tics: Vec<Tic> = nodes.iter().map(|(s, _)| s.gametic()).collect();
        let spread = tics.iter().max().unwrap() - tics.iter().min().unwrap();
        assert!(spread <= config.extra_tics, "frame {} spread {}", frame, spread);
    }

    for (session, _) in &nodes {
        assert!(session.gametic() > 300, "gametic {}", session.gametic());
        assert_eq!(session.stats().desyncs, 0);
    }
    assert_inputs_match_producers(&nodes);
}

fn user(player: usize) -> UserInfo {
    UserInfo {
        name: format!("player{}", player),
        team: 0,
        color: "40 cf 00".into(),
    }
}

fn arbitrators(count: usize) -> Vec<Arbitrator> {
    (0..count)
        .map(|p| {
            let info = (p == 0).then(game);
            Arbitrator::new(p, count, user(p), info).unwrap()
        })
        .collect()
}

#[test]
fn test_startup_finishes_under_reordering() {
    for count in 2..=8 {
        let net = MemoryNetwork::new(count, ManualClock::new(), count as u64);
        net.set_reorder(true);
        let mut transports: Vec<_> = (0..count).map(|e| net.endpoint(e)).collect();
        let mut arbs = arbitrators(count);
        let mut ready = vec![false; count];

        let mut rounds = 0;
        while !ready.iter().all(|&r| r) {
            rounds += 1;
            assert!(rounds <= 3 * count, "{} nodes not ready after {} rounds", count, rounds);
            for e in 0..count {
                if !ready[e] {
                    ready[e] = arbs[e].poll(&mut transports[e]).unwrap() == StartupState::Ready;
                }
            }
        }

        for (e, arb) in arbs.into_iter().enumerate() {
            let roster = arb.into_roster().unwrap();
            assert_eq!(roster.num_nodes(), count);
            assert_eq!(roster.node_players[0], e);
            assert_eq!(roster.game_info, game());
            for p in 0..count {
                assert_eq!(roster.users[p].as_ref().unwrap().name, format!("player{}", p));
            }
        }
    }
}

#[test]
fn test_startup_finishes_under_loss() {
    for seed in 0..4 {
        let count = 4;
        let net = MemoryNetwork::new(count, ManualClock::new(), seed);
        net.set_loss(0.2);
        net.set_reorder(true);
        let mut transports: Vec<_> = (0..count).map(|e| net.endpoint(e)).collect();
        let mut arbs = arbitrators(count);

        let mut states = vec![StartupState::Waiting; count];
        for _ in 0..200 {
            for e in 0..count {
                states[e] = arbs[e].poll(&mut transports[e]).unwrap();
            }
            if states.iter().all(|&s| s == StartupState::Ready) {
                break;
            }
        }
        assert!(states.iter().all(|&s| s == StartupState::Ready), "seed {}", seed);
        assert!(arbs.iter().all(|a| a.is_ready()));
    }
}

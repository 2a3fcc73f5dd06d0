// Lockstep session state
//
// One Session owns everything a running game needs: the local and remote
// command rings, per-node sync state, the special stream and the pacing
// counters. Packet ingest lives in ingest.rs and frame pacing in pacer.rs.

use tracing::{debug, info, warn};

use crate::arbitrate::Roster;
use crate::clock::Clock;
use crate::error::{NetError, Result};
use crate::fields;
use crate::node::{NodeState, MAX_PLAYERS};
use crate::pacer::PendingRun;
use crate::sim::Simulation;
use crate::special::{SpecialCommand, SpecialStream};
use crate::ticbuf::{ConsistencyLedger, RemoteCommandTable, RemoteTic, TicRing, BACKUPTICS};
use crate::transport::Transport;
use crate::wire::{Packet, TicCmd};
use crate::{NodeId, PlayerId, Tic};

/// EXIT packets sent to each node when leaving.
pub const EXIT_REPEAT: usize = 4;

/// Largest allowed tic duplication.
pub const MAX_TICDUP: Tic = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Tics of the previous packet repeated in each new one.
    pub extra_tics: Tic,
    /// Simulation steps per command tic.
    pub ticdup: Tic,
    /// Offline mode: local commands go straight to the command table.
    pub single_tics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extra_tics: 1,
            ticdup: 1,
            single_tics: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TICDUP).contains(&self.ticdup) {
            return Err(NetError::InvalidConfig(format!(
                "ticdup must be between 1 and {}, got {}",
                MAX_TICDUP, self.ticdup
            )));
        }
        if !(0..BACKUPTICS as Tic / 2).contains(&self.extra_tics) {
            return Err(NetError::InvalidConfig(format!(
                "extra_tics must be below {}, got {}",
                BACKUPTICS / 2,
                self.extra_tics
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStats {
    pub desyncs: u64,
    pub dropped_packets: u64,
    pub stalls: u64,
}

pub struct Session<T: Transport, C: Clock> {
    pub(crate) transport: T,
    pub(crate) clock: C,
    pub(crate) config: SessionConfig,
    pub(crate) roster: Roster,

    pub(crate) local_cmds: TicRing<TicCmd>,
    pub(crate) specials: SpecialStream,
    pub(crate) net_cmds: RemoteCommandTable,
    pub(crate) consistency: ConsistencyLedger,

    pub(crate) nodes: Vec<NodeState>,
    pub(crate) node_for_player: [Option<NodeId>; MAX_PLAYERS],
    pub(crate) player_in_game: [bool; MAX_PLAYERS],
    pub(crate) arbitrator: PlayerId,
    /// Our own packet to node 0, handed back by the next receive.
    pub(crate) rebound: Option<Vec<u8>>,

    /// Next command tic to build.
    pub(crate) maketic: Tic,
    /// Simulation steps run so far.
    pub(crate) gametic: Tic,
    pub(crate) gametime: Tic,
    pub(crate) skiptics: Tic,
    pub(crate) frameskip: [bool; MAX_PLAYERS],
    pub(crate) frameon: usize,
    pub(crate) oldnettics: Tic,
    pub(crate) oldentertics: Tic,
    pub(crate) pending: Option<PendingRun>,

    /// Previous and latest receipt time per player.
    pub(crate) recv_times: [(Tic, Tic); MAX_PLAYERS],
    pub(crate) stats: NetStats,
}

impl<T: Transport, C: Clock> Session<T, C> {
    pub fn new(transport: T, clock: C, config: SessionConfig, roster: Roster) -> Result<Self> {
        config.validate()?;

        let num_nodes = roster.num_nodes();
        if num_nodes == 0 || transport.num_nodes() < num_nodes {
            return Err(NetError::InvalidConfig(format!(
                "roster has {} nodes, transport knows {}",
                num_nodes,
                transport.num_nodes()
            )));
        }
        if config.single_tics && num_nodes > 1 {
            return Err(NetError::InvalidConfig(
                "single tic mode is offline only".to_string(),
            ));
        }

        let mut nodes = Vec::with_capacity(num_nodes);
        let mut node_for_player = [None; MAX_PLAYERS];
        let mut player_in_game = [false; MAX_PLAYERS];
        for (node, &player) in roster.node_players.iter().enumerate() {
            if player >= MAX_PLAYERS {
                return Err(NetError::InvalidConfig(format!(
                    "player {} out of range",
                    player
                )));
            }
            if player_in_game[player] {
                return Err(NetError::InvalidConfig(format!(
                    "player {} is hosted by more than one node",
                    player
                )));
            }
            nodes.push(NodeState {
                player: Some(player),
                ..NodeState::new(true)
            });
            node_for_player[player] = Some(node);
            player_in_game[player] = true;
        }
        let arbitrator = player_in_game.iter().position(|&p| p).unwrap_or(0);

        let start = clock.now() / config.ticdup;
        let mut specials = SpecialStream::new();
        specials.begin_tic(0);

        info!(
            { fields::PLAYER } = roster.console_player,
            { fields::NUM_NODES } = num_nodes,
            { fields::ARBITRATOR } = arbitrator,
            extra_tics = config.extra_tics,
            ticdup = config.ticdup,
            "Session started"
        );

        Ok(Self {
            transport,
            clock,
            config,
            roster,
            local_cmds: TicRing::new(),
            specials,
            net_cmds: RemoteCommandTable::new(),
            consistency: ConsistencyLedger::new(),
            nodes,
            node_for_player,
            player_in_game,
            arbitrator,
            rebound: None,
            maketic: 0,
            gametic: 0,
            gametime: start,
            skiptics: 0,
            frameskip: [false; MAX_PLAYERS],
            frameon: 0,
            oldnettics: 0,
            oldentertics: start,
            pending: None,
            recv_times: [(0, 0); MAX_PLAYERS],
            stats: NetStats::default(),
        })
    }

    pub fn console_player(&self) -> PlayerId {
        self.roster.console_player
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn maketic(&self) -> Tic {
        self.maketic
    }

    pub fn gametic(&self) -> Tic {
        self.gametic
    }

    pub fn arbitrator(&self) -> PlayerId {
        self.arbitrator
    }

    pub fn stats(&self) -> NetStats {
        self.stats
    }

    pub fn node(&self, node: NodeId) -> Option<&NodeState> {
        self.nodes.get(node)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_player_in_game(&self, player: PlayerId) -> bool {
        self.player_in_game.get(player).copied().unwrap_or(false)
    }

    pub fn players_in_game(&self) -> impl Iterator<Item = PlayerId> + '_ {
        (0..MAX_PLAYERS).filter(|&p| self.player_in_game[p])
    }

    /// Confirmed command for a player.
    pub fn net_cmd(&self, player: PlayerId, tic: Tic) -> &RemoteTic {
        self.net_cmds.get(player, tic)
    }

    /// Command this node built for `tic`.
    pub fn local_cmd(&self, tic: Tic) -> &TicCmd {
        self.local_cmds.get(tic)
    }

    /// Lowest tic any in-game node has confirmed.
    pub fn low_tic(&self) -> Tic {
        self.nodes
            .iter()
            .filter(|n| n.in_game)
            .map(|n| n.highest_tic_received)
            .min()
            .unwrap_or(self.maketic)
    }

    /// Real tics between the last two packets from a player.
    pub fn ping(&self, player: PlayerId) -> Option<Tic> {
        let (last, curr) = *self.recv_times.get(player)?;
        Some(curr - last)
    }

    /// Queues an event for the tic being assembled.
    pub fn queue_special(&mut self, cmd: &SpecialCommand) {
        self.specials.write_command(cmd);
    }

    pub fn specials_mut(&mut self) -> &mut SpecialStream {
        &mut self.specials
    }

    pub(crate) fn send_packet(&mut self, node: NodeId, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        if node == 0 {
            self.rebound = Some(bytes);
        } else {
            self.transport.send(node, &bytes);
        }
        Ok(())
    }

    /// Next valid packet, our own looped-back one first. Corrupt packets are
    /// dropped here; protocol violations are returned.
    pub(crate) fn get_packet(&mut self) -> Result<Option<(NodeId, Packet)>> {
        loop {
            let (node, bytes) = match self.rebound.take() {
                Some(bytes) => (0, bytes),
                None => match self.transport.try_receive()? {
                    Some(msg) => msg,
                    None => return Ok(None),
                },
            };
            if node >= self.nodes.len() {
                continue;
            }
            match Packet::decode(&bytes) {
                Ok(packet) => return Ok(Some((node, packet))),
                Err(e) if e.is_corruption() => {
                    self.stats.dropped_packets += 1;
                    warn!(
                        { fields::NODE } = node,
                        { fields::PACKET_SIZE } = bytes.len(),
                        { fields::ERROR } = %e,
                        "Dropping corrupt packet"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Takes a node out of the game and its player out of the simulation.
    pub(crate) fn drop_node<S: Simulation>(&mut self, node: NodeId, sim: &mut S, reason: &str) {
        let Some(state) = self.nodes.get_mut(node) else {
            return;
        };
        if !state.in_game || node == 0 {
            return;
        }
        state.in_game = false;
        state.needs_resend = false;

        let Some(player) = state.player else {
            return;
        };
        self.player_in_game[player] = false;
        self.net_cmds.clear_player(player);
        sim.remove_player(player);
        info!(
            { fields::NODE } = node,
            { fields::PLAYER } = player,
            { fields::REASON } = reason,
            "Player left the game"
        );

        if player == self.arbitrator {
            let next = self.players_in_game().next();
            if let Some(next) = next {
                self.arbitrator = next;
                self.frameskip = [false; MAX_PLAYERS];
                info!({ fields::ARBITRATOR } = next, "New arbitrator");
            }
        }
    }

    /// Tells every remote node we are leaving.
    pub fn quit(&mut self) -> Result<()> {
        let packet = Packet::exit(self.roster.console_player as u8);
        for _ in 0..EXIT_REPEAT {
            for node in 1..self.nodes.len() {
                if self.nodes[node].in_game {
                    self.send_packet(node, &packet)?;
                }
            }
        }
        debug!({ fields::NUM_NODES } = self.nodes.len(), "Sent exit packets");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrate::{GameInfo, UserInfo};
    use crate::clock::ManualClock;
    use crate::transport::{MemoryNetwork, MemoryTransport};

    fn game() -> GameInfo {
        GameInfo {
            map: "MAP01".into(),
            rng_seed: 1,
            settings: Vec::new(),
        }
    }

    fn roster(console_player: PlayerId, node_players: Vec<PlayerId>) -> Roster {
        let mut r = Roster::solo(UserInfo::default(), game());
        r.console_player = console_player;
        r.node_players = node_players;
        r
    }

    fn pair() -> (MemoryNetwork, Session<MemoryTransport, ManualClock>, MemoryTransport) {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(2, clock.clone(), 9);
        let session = Session::new(
            net.endpoint(0),
            clock,
            SessionConfig::default(),
            roster(0, vec![0, 1]),
        )
        .unwrap();
        let peer = net.endpoint(1);
        (net, session, peer)
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        let bad = SessionConfig {
            ticdup: 6,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(NetError::InvalidConfig(_))));
        let bad = SessionConfig {
            extra_tics: BACKUPTICS as Tic / 2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_single_tics_needs_solo() {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(2, clock.clone(), 1);
        let config = SessionConfig {
            single_tics: true,
            ..Default::default()
        };
        assert!(Session::new(net.endpoint(0), clock, config, roster(0, vec![0, 1])).is_err());
    }

    #[test]
    fn test_player_on_two_nodes_is_rejected() {
        let clock = ManualClock::new();
        let net = MemoryNetwork::new(3, clock.clone(), 1);
        let result = Session::new(
            net.endpoint(0),
            clock,
            SessionConfig::default(),
            roster(0, vec![0, 1, 1]),
        );
        assert!(matches!(result, Err(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_rebound_packet_skips_transport() {
        let (net, mut session, _peer) = pair();
        let packet = Packet::exit(0);
        session.send_packet(0, &packet).unwrap();
        assert_eq!(net.sent(), 0);
        let (node, got) = session.get_packet().unwrap().unwrap();
        assert_eq!(node, 0);
        assert_eq!(got, packet);
        assert!(session.get_packet().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_packets_are_counted_and_dropped() {
        let (_net, mut session, mut peer) = pair();
        let mut bytes = Packet::exit(1).encode().unwrap();
        bytes[5] ^= 1;
        peer.send(1, &bytes);
        assert!(session.get_packet().unwrap().is_none());
        assert_eq!(session.stats().dropped_packets, 1);
    }

    #[test]
    fn test_quit_sends_exit_repeatedly() {
        let (_net, mut session, mut peer) = pair();
        session.quit().unwrap();
        let mut exits = 0;
        while let Some((node, bytes)) = peer.try_receive().unwrap() {
            assert_eq!(node, 1);
            let packet = Packet::decode(&bytes).unwrap();
            assert!(packet.header.is_exit());
            assert_eq!(packet.header.player_num(), 0);
            exits += 1;
        }
        assert_eq!(exits, EXIT_REPEAT);
    }
}

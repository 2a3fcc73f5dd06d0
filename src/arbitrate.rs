// Startup handshake
//
// Every node keeps broadcasting its user info and the arbitrator (player 0)
// also broadcasts the game info. A user-info packet's start_tic says how many
// nodes its sender has detected; the handshake is over once every node
// reports having detected every node.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NetError, Result};
use crate::fields;
use crate::node::MAX_PLAYERS;
use crate::transport::Transport;
use crate::wire::{Packet, PacketHeader, Reader, Writer, NCMD_KILL, NCMD_SETUP};
use crate::{NodeId, PlayerId};

/// Carried in the player byte of game-info packets.
pub const NET_VERSION: u8 = 1;

/// Receive attempts per poll before re-broadcasting.
pub const SETUP_POLL_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CVar {
    pub name: String,
    pub value: String,
}

/// Session-wide settings originated by the arbitrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfo {
    pub map: String,
    pub rng_seed: u32,
    pub settings: Vec<CVar>,
}

impl GameInfo {
    pub fn to_packet(&self) -> Result<Packet> {
        let mut w = Writer::new();
        w.write_str(&self.map);
        w.write_u32(self.rng_seed);
        w.write_bytes(&bincode::serialize(&self.settings)?);
        Ok(Packet::new(
            PacketHeader {
                flags: NCMD_SETUP,
                player: NET_VERSION,
                ..Default::default()
            },
            w.into_vec(),
        ))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.header.player != NET_VERSION {
            return Err(NetError::VersionMismatch {
                ours: NET_VERSION,
                theirs: packet.header.player,
            });
        }
        let mut r = Reader::new(&packet.payload);
        let map = r.read_string()?;
        let rng_seed = r.read_u32()?;
        let settings = bincode::deserialize(r.rest())?;
        Ok(Self {
            map,
            rng_seed,
            settings,
        })
    }
}

/// Per-player identity, sent as a `\key\value` string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub team: u8,
    pub color: String,
}

fn clean(value: &str) -> String {
    value.replace(|c: char| c == '\\' || c == '\0', "/")
}

impl UserInfo {
    pub fn to_info_string(&self) -> String {
        format!(
            "\\name\\{}\\team\\{}\\color\\{}",
            clean(&self.name),
            self.team,
            clean(&self.color)
        )
    }

    /// Unknown keys are ignored, missing ones keep their defaults.
    pub fn parse(info: &str) -> Self {
        let mut user = UserInfo::default();
        let mut parts = info.split('\\').skip(1);
        while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            match key {
                "name" => user.name = value.to_string(),
                "team" => user.team = value.parse().unwrap_or_default(),
                "color" => user.color = value.to_string(),
                _ => {}
            }
        }
        user
    }

    /// User-info packet announcing how many nodes the sender has detected.
    pub fn to_packet(&self, player: PlayerId, detected: usize) -> Packet {
        let mut w = Writer::new();
        w.write_str(&self.to_info_string());
        Packet::new(
            PacketHeader {
                flags: NCMD_SETUP | NCMD_KILL,
                player: player as u8,
                start_tic: detected.min(u8::MAX as usize) as u8,
                ..Default::default()
            },
            w.into_vec(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    Waiting,
    Ready,
}

/// Who is who once the handshake is done.
#[derive(Debug, Clone)]
pub struct Roster {
    pub console_player: PlayerId,
    pub game_info: GameInfo,
    /// Indexed by player.
    pub users: Vec<Option<UserInfo>>,
    /// Indexed by node; node 0 hosts the console player.
    pub node_players: Vec<PlayerId>,
}

impl Roster {
    /// Single-node game, no handshake needed.
    pub fn solo(local: UserInfo, game_info: GameInfo) -> Self {
        let mut users = vec![None; MAX_PLAYERS];
        users[0] = Some(local);
        Self {
            console_player: 0,
            game_info,
            users,
            node_players: vec![0],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.node_players.len()
    }

    pub fn local_user(&self) -> Option<&UserInfo> {
        self.users.get(self.console_player)?.as_ref()
    }

    pub fn is_arbitrator(&self) -> bool {
        self.console_player == 0
    }
}

pub struct Arbitrator {
    console_player: PlayerId,
    num_nodes: usize,
    local: UserInfo,
    game_info: Option<GameInfo>,
    /// Slot 0 counts the nodes we know about; other slots hold what each
    /// node last reported about itself.
    nodes_detected: Vec<usize>,
    node_players: Vec<Option<PlayerId>>,
    users: Vec<Option<UserInfo>>,
    rounds: usize,
}

impl Arbitrator {
    /// Player 0 arbitrates and must bring the game info.
    pub fn new(
        console_player: PlayerId,
        num_nodes: usize,
        local: UserInfo,
        game_info: Option<GameInfo>,
    ) -> Result<Self> {
        if console_player >= MAX_PLAYERS {
            return Err(NetError::InvalidConfig(format!(
                "console player {} out of range",
                console_player
            )));
        }
        if console_player == 0 && game_info.is_none() {
            return Err(NetError::InvalidConfig(
                "the arbitrator needs game info".to_string(),
            ));
        }

        let mut nodes_detected = vec![0; num_nodes.max(1)];
        nodes_detected[0] = 1;
        let mut node_players = vec![None; num_nodes.max(1)];
        node_players[0] = Some(console_player);
        let mut users = vec![None; MAX_PLAYERS];
        users[console_player] = Some(local.clone());

        info!(
            { fields::PLAYER } = console_player,
            { fields::NUM_NODES } = num_nodes,
            "Waiting for {} more node(s)",
            num_nodes.saturating_sub(1)
        );

        Ok(Self {
            console_player,
            num_nodes: num_nodes.max(1),
            local,
            game_info,
            nodes_detected,
            node_players,
            users,
            rounds: 0,
        })
    }

    fn is_arbitrator(&self) -> bool {
        self.console_player == 0
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn is_ready(&self) -> bool {
        self.game_info.is_some() && self.nodes_detected.iter().all(|&n| n >= self.num_nodes)
    }

    /// One handshake round: drain a few packets, then re-broadcast.
    pub fn poll<T: Transport>(&mut self, transport: &mut T) -> Result<StartupState> {
        self.rounds += 1;
        if self.num_nodes == 1 {
            return Ok(if self.is_ready() {
                StartupState::Ready
            } else {
                StartupState::Waiting
            });
        }

        for _ in 0..SETUP_POLL_ATTEMPTS {
            let Some((node, bytes)) = transport.try_receive()? else {
                break;
            };
            match Packet::decode(&bytes) {
                Ok(packet) => self.handle(node, &packet)?,
                Err(e) if e.is_corruption() => {
                    debug!(
                        { fields::NODE } = node,
                        { fields::ERROR } = %e,
                        "Dropping bad setup packet"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let ready = self.is_ready();
        self.broadcast(transport)?;
        Ok(if ready {
            StartupState::Ready
        } else {
            StartupState::Waiting
        })
    }

    fn handle(&mut self, node: NodeId, packet: &Packet) -> Result<()> {
        let header = &packet.header;
        if !header.is_setup() || node == 0 || node >= self.num_nodes {
            return Ok(());
        }

        if header.is_kill() {
            let player = header.player_num();
            if player >= MAX_PLAYERS {
                warn!({ fields::NODE } = node, { fields::PLAYER } = player, "Bad player in user info");
                return Ok(());
            }
            let taken = self.node_players.contains(&Some(player));
            if taken && self.node_players[node] != Some(player) {
                warn!(
                    { fields::NODE } = node,
                    { fields::PLAYER } = player,
                    "Player number already taken"
                );
                return Ok(());
            }
            // Arrival order is arbitrary; never let an old report win.
            let reported = usize::from(header.start_tic);
            self.nodes_detected[node] = self.nodes_detected[node].max(reported);

            if self.node_players[node].is_none() {
                let mut r = Reader::new(&packet.payload);
                let user = UserInfo::parse(&r.read_string()?);
                info!(
                    { fields::NODE } = node,
                    { fields::PLAYER } = player,
                    { fields::USER_NAME } = %user.name,
                    "Player connected"
                );
                self.node_players[node] = Some(player);
                self.users[player] = Some(user);
                self.nodes_detected[0] += 1;
            }
        } else if self.game_info.is_none() {
            let info = GameInfo::from_packet(packet)?;
            info!(
                { fields::MAP } = %info.map,
                { fields::RNG_SEED } = info.rng_seed,
                "Received game info"
            );
            self.game_info = Some(info);
        }
        Ok(())
    }

    fn broadcast<T: Transport>(&self, transport: &mut T) -> Result<()> {
        let user = self
            .local
            .to_packet(self.console_player, self.nodes_detected[0])
            .encode()?;
        let game = match (&self.game_info, self.is_arbitrator()) {
            (Some(info), true) => Some(info.to_packet()?.encode()?),
            _ => None,
        };
        for node in 1..self.num_nodes {
            transport.send(node, &user);
            if let Some(game) = &game {
                transport.send(node, game);
            }
        }
        Ok(())
    }

    pub fn into_roster(self) -> Result<Roster> {
        if !self.is_ready() {
            return Err(NetError::StartupIncomplete);
        }
        let game_info = self.game_info.ok_or(NetError::StartupIncomplete)?;
        let node_players = self
            .node_players
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(NetError::StartupIncomplete)?;
        Ok(Roster {
            console_player: self.console_player,
            game_info,
            users: self.users,
            node_players,
        })
    }
}

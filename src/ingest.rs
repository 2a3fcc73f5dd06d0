// Incoming packet processing
//
// Applies received tic windows to the remote command table, one node at a
// time. A window that starts past what we already have is discarded whole
// and a resend is requested instead.

use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{NetError, Result};
use crate::fields;
use crate::node::{Arrival, MAX_PLAYERS};
use crate::session::Session;
use crate::sim::Simulation;
use crate::transport::Transport;
use crate::wire::{expand_tics, read_tic_cmd, skip_tic_cmds, Packet, PacketHeader, Reader};
use crate::{NodeId, Tic};

impl<T: Transport, C: Clock> Session<T, C> {
    /// Drains the transport and applies every valid packet.
    pub fn get_packets<S: Simulation>(&mut self, sim: &mut S) -> Result<()> {
        while let Some((node, packet)) = self.get_packet()? {
            self.handle_packet(node, &packet, sim)?;
        }
        Ok(())
    }

    pub(crate) fn handle_packet<S: Simulation>(
        &mut self,
        node: NodeId,
        packet: &Packet,
        sim: &mut S,
    ) -> Result<()> {
        let header = packet.header;
        if header.is_setup() {
            return self.answer_late_setup(node, &header);
        }

        let player = header.player_num();
        if player >= MAX_PLAYERS {
            self.stats.dropped_packets += 1;
            warn!({ fields::NODE } = node, { fields::PLAYER } = player, "Bad player number");
            return Ok(());
        }

        if header.is_exit() {
            self.drop_node(node, sim, "exit");
            return Ok(());
        }

        if header.is_kill() {
            return Err(NetError::Killed { node });
        }

        if !self.nodes[node].in_game {
            trace!({ fields::NODE } = node, "Packet from node not in game");
            return Ok(());
        }
        if self.nodes[node].player != Some(player) {
            self.stats.dropped_packets += 1;
            warn!(
                { fields::NODE } = node,
                { fields::PLAYER } = player,
                "Packet for a player the node does not host"
            );
            return Ok(());
        }
        self.node_for_player[player] = Some(node);
        let (_, latest) = self.recv_times[player];
        self.recv_times[player] = (latest, self.clock.now());

        let from = header
            .wants_retransmit()
            .then(|| expand_tics(header.retransmit_from, self.maketic));
        if self.nodes[node].note_retransmit_request(from) {
            debug!(
                { fields::NODE } = node,
                { fields::TIC } = self.nodes[node].resend_from,
                "Retransmit requested"
            );
        }

        let start = expand_tics(header.start_tic, self.maketic);
        let end = start + Tic::from(header.num_tics);
        if start < 0 {
            self.stats.dropped_packets += 1;
            return Ok(());
        }

        match self.nodes[node].classify(start, end) {
            Arrival::Duplicate => {}
            Arrival::Stale => {
                trace!(
                    { fields::NODE } = node,
                    { fields::START_TIC } = start,
                    { fields::NUM_TICS } = header.num_tics,
                    "Out of order packet"
                );
            }
            Arrival::Gap => {
                debug!(
                    { fields::NODE } = node,
                    { fields::START_TIC } = start,
                    { fields::TIC } = self.nodes[node].highest_tic_received,
                    "Missed tics"
                );
                self.nodes[node].needs_resend = true;
            }
            Arrival::Fresh { already_have } => {
                self.nodes[node].needs_resend = false;
                let mut r = Reader::new(&packet.payload);
                skip_tic_cmds(&mut r, already_have)?;
                for tic in self.nodes[node].highest_tic_received..end {
                    let (cmd, specials) = read_tic_cmd(&mut r)?;
                    self.net_cmds.store(player, tic, cmd, specials);
                    self.nodes[node].highest_tic_received = tic + 1;
                }
                trace!(
                    { fields::NODE } = node,
                    { fields::TIC } = end,
                    "Tics received"
                );
            }
        }
        Ok(())
    }

    /// A peer still in the handshake keeps sending user info. Answer it so
    /// it can finish even if our last handshake packets were lost.
    fn answer_late_setup(&mut self, node: NodeId, header: &PacketHeader) -> Result<()> {
        if node == 0 || node >= self.nodes.len() || !header.is_kill() {
            return Ok(());
        }
        let Some(user) = self.roster.local_user() else {
            return Ok(());
        };
        let reply = user.to_packet(self.roster.console_player, self.nodes.len());
        self.send_packet(node, &reply)?;
        if self.roster.is_arbitrator() {
            let game = self.roster.game_info.to_packet()?;
            self.send_packet(node, &game)?;
        }
        debug!({ fields::NODE } = node, "Answered late setup packet");
        Ok(())
    }
}

// Datagram transports
//
// Node 0 is always the local endpoint. Sends are fire-and-forget and receives
// never block.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, ManualClock};
use crate::error::NetError;
use crate::fields;
use crate::wire::MAX_MSGLEN;
use crate::{NodeId, Tic};

pub trait Transport {
    fn send(&mut self, node: NodeId, data: &[u8]);

    /// Next datagram from a known node, if one is waiting.
    fn try_receive(&mut self) -> Result<Option<(NodeId, Vec<u8>)>, NetError>;

    /// Known nodes, the local one included.
    fn num_nodes(&self) -> usize;
}

/// UDP transport over a tokio socket, driven with the non-blocking
/// `try_*` calls so the engine can poll it from a frame loop.
pub struct UdpTransport {
    socket: UdpSocket,
    /// Index is the node id; slot 0 is our own bound address.
    nodes: Vec<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, peers: Vec<SocketAddr>) -> Result<Self, NetError> {
        let local = socket.local_addr()?;
        let mut nodes = Vec::with_capacity(peers.len() + 1);
        nodes.push(local);
        nodes.extend(peers);
        Ok(Self {
            socket,
            nodes,
            buf: vec![0; MAX_MSGLEN],
        })
    }

    pub fn node_addr(&self, node: NodeId) -> Option<SocketAddr> {
        self.nodes.get(node).copied()
    }

    fn node_for(&self, addr: &SocketAddr) -> Option<NodeId> {
        self.nodes.iter().skip(1).position(|a| a == addr).map(|i| i + 1)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, node: NodeId, data: &[u8]) {
        let Some(addr) = self.node_addr(node) else {
            warn!({ fields::NODE } = node, "Send to unknown node");
            return;
        };
        match self.socket.try_send_to(data, addr) {
            Ok(_) => trace!(
                { fields::ADDR } = %addr,
                { fields::PACKET_SIZE } = data.len(),
                "Packet sent"
            ),
            Err(e) => debug!(
                { fields::ADDR } = %addr,
                { fields::ERROR } = %e,
                "Send failed"
            ),
        }
    }

    fn try_receive(&mut self) -> Result<Option<(NodeId, Vec<u8>)>, NetError> {
        loop {
            let (len, src) = match self.socket.try_recv_from(&mut self.buf) {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable from a peer that went away
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };
            match self.node_for(&src) {
                Some(node) => return Ok(Some((node, self.buf[..len].to_vec()))),
                None => {
                    debug!(
                        { fields::ADDR } = %src,
                        { fields::PACKET_SIZE } = len,
                        "Ignoring packet from unknown address"
                    );
                }
            }
        }
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

struct InFlight {
    deliver_at: Tic,
    from: usize,
    data: Vec<u8>,
}

struct Hub {
    clock: ManualClock,
    rng: StdRng,
    loss: f64,
    reorder: bool,
    delay: Vec<Tic>,
    queues: Vec<VecDeque<InFlight>>,
    sent: usize,
    dropped: usize,
}

/// In-process datagram hub with seeded loss, per-sender delay and optional
/// reordering. Time comes from a shared `ManualClock`.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new(endpoints: usize, clock: ManualClock, seed: u64) -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                clock,
                rng: StdRng::seed_from_u64(seed),
                loss: 0.0,
                reorder: false,
                delay: vec![0; endpoints],
                queues: (0..endpoints).map(|_| VecDeque::new()).collect(),
                sent: 0,
                dropped: 0,
            })),
        }
    }

    /// Probability that any datagram is lost.
    pub fn set_loss(&self, loss: f64) {
        self.hub.borrow_mut().loss = loss;
    }

    /// Delivers ready datagrams in random order.
    pub fn set_reorder(&self, reorder: bool) {
        self.hub.borrow_mut().reorder = reorder;
    }

    /// Delay applied to everything `endpoint` sends.
    pub fn set_delay(&self, endpoint: usize, tics: Tic) {
        self.hub.borrow_mut().delay[endpoint] = tics;
    }

    pub fn dropped(&self) -> usize {
        self.hub.borrow().dropped
    }

    pub fn sent(&self) -> usize {
        self.hub.borrow().sent
    }

    /// Transport for `endpoint`. Its node 0 is itself, the other endpoints
    /// follow in ascending order.
    pub fn endpoint(&self, me: usize) -> MemoryTransport {
        let count = self.hub.borrow().queues.len();
        let mut nodes = vec![me];
        nodes.extend((0..count).filter(|&e| e != me));
        MemoryTransport {
            me,
            nodes,
            net: self.clone(),
        }
    }
}

pub struct MemoryTransport {
    me: usize,
    /// Node id to endpoint.
    nodes: Vec<usize>,
    net: MemoryNetwork,
}

impl MemoryTransport {
    pub fn endpoint_id(&self) -> usize {
        self.me
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, node: NodeId, data: &[u8]) {
        let Some(&to) = self.nodes.get(node) else {
            return;
        };
        let mut hub = self.net.hub.borrow_mut();
        hub.sent += 1;
        let loss = hub.loss;
        if loss > 0.0 && hub.rng.gen_bool(loss) {
            hub.dropped += 1;
            return;
        }
        let deliver_at = hub.clock.now() + hub.delay[self.me];
        hub.queues[to].push_back(InFlight {
            deliver_at,
            from: self.me,
            data: data.to_vec(),
        });
    }

    fn try_receive(&mut self) -> Result<Option<(NodeId, Vec<u8>)>, NetError> {
        let mut hub = self.net.hub.borrow_mut();
        let now = hub.clock.now();
        let ready: Vec<usize> = hub.queues[self.me]
            .iter()
            .enumerate()
            .filter(|(_, m)| m.deliver_at <= now)
            .map(|(i, _)| i)
            .collect();
        if ready.is_empty() {
            return Ok(None);
        }
        let pick = if hub.reorder {
            ready[hub.rng.gen_range(0..ready.len())]
        } else {
            ready[0]
        };
        let Some(msg) = hub.queues[self.me].remove(pick) else {
            return Ok(None);
        };
        let node = self.nodes.iter().position(|&e| e == msg.from);
        Ok(node.map(|n| (n, msg.data)))
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

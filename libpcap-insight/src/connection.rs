//! Per-connection TCP state
//!
//! The table is keyed by flow: both directions of a connection share one
//! `Flow`, and each direction keeps its own sequence and acknowledgment state.

use crate::packet::Packet;
use fnv::{FnvHashMap, FnvHashSet};
use libpcap_tools::{Config, FiveTuple, Flow, FlowID, ToFiveTuple};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Tracking options
///
/// Config key: `tcp.skip_pure_ack_sequence` (default `false`). When set,
/// segments without payload, SYN or FIN are not checked for a repeated
/// sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub skip_pure_ack_sequence: bool,
}

impl ConnectionConfig {
    pub fn from_config(config: &Config) -> Self {
        ConnectionConfig {
            skip_pure_ack_sequence: config
                .get_bool("tcp.skip_pure_ack_sequence")
                .unwrap_or_default(),
        }
    }
}

/// What the tracker concluded about one TCP segment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpObservation {
    pub flow_id: FlowID,
    pub retransmission: bool,
    pub duplicate_ack: bool,
    /// Consecutive duplicate ACKs in this direction, this one included
    pub duplicate_ack_run: usize,
    pub reset: bool,
}

#[derive(Default)]
struct Direction {
    seen_seqs: FnvHashSet<u32>,
    last_ack: Option<u32>,
    duplicate_ack_run: usize,
}

struct Connection {
    flow: Flow,
    forward: Direction,
    reverse: Direction,
}

/// Storage for TCP connections
#[derive(Default)]
pub struct ConnectionTable {
    connections: FnvHashMap<FlowID, Connection>,
    flows_id: HashMap<FiveTuple, FlowID>,
    next_id: FlowID,
    resets: usize,
    config: ConnectionConfig,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable::default()
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        ConnectionTable {
            config,
            ..ConnectionTable::default()
        }
    }

    pub fn lookup_flow(&self, five_t: &FiveTuple) -> Option<FlowID> {
        self.flows_id.get(five_t).copied()
    }

    /// Number of tracked connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of resets seen so far
    pub fn resets(&self) -> usize {
        self.resets
    }

    fn insert_flow(&mut self, five_t: &FiveTuple, packet: &Packet) -> FlowID {
        if let Some(id) = self.flows_id.get(&five_t.get_reverse()).copied() {
            trace!("Inserting reverse flow ID 0x{:x}", id);
            self.flows_id.insert(five_t.clone(), id);
            return id;
        }
        // ids are sequential so that repeated runs give the same result
        let id = self.next_id;
        self.next_id += 1;
        trace!("Inserting new flow (id=0x{:x}) {}", id, five_t);
        let flow = Flow::new(id, five_t, packet.timestamp);
        self.connections.insert(
            id,
            Connection {
                flow,
                forward: Direction::default(),
                reverse: Direction::default(),
            },
        );
        self.flows_id.insert(five_t.clone(), id);
        id
    }

    fn remove_flow(&mut self, flow_id: FlowID) {
        if let Some(conn) = self.connections.remove(&flow_id) {
            self.flows_id.remove(&conn.flow.five_tuple);
            self.flows_id.remove(&conn.flow.five_tuple.get_reverse());
        }
    }

    /// Update the state with a packet; `None` if it is not a TCP segment over IP
    pub fn observe(&mut self, packet: &Packet) -> Option<TcpObservation> {
        let tcp = packet.layers.tcp()?;
        let five_t = packet.get_five_tuple()?;
        let flow_id = match self.lookup_flow(&five_t) {
            Some(id) => id,
            None => self.insert_flow(&five_t, packet),
        };
        let conn = self.connections.get_mut(&flow_id)?;
        conn.flow.touch(packet.timestamp);
        let dir = if conn.flow.is_forward(&five_t) {
            &mut conn.forward
        } else {
            &mut conn.reverse
        };

        let mut obs = TcpObservation {
            flow_id,
            ..TcpObservation::default()
        };
        let consumes_seq = tcp.payload_length > 0 || tcp.flags.syn || tcp.flags.fin;
        let checked = consumes_seq || !self.config.skip_pure_ack_sequence;
        if checked && !dir.seen_seqs.insert(tcp.sequence) {
            debug!(
                "packet {}: retransmission seq={} on flow 0x{:x}",
                packet.id, tcp.sequence, flow_id
            );
            obs.retransmission = true;
        }

        if tcp.flags.is_ack_only()
            && tcp.payload_length == 0
            && dir.last_ack == Some(tcp.acknowledgment)
        {
            dir.duplicate_ack_run += 1;
            obs.duplicate_ack = true;
        } else {
            dir.duplicate_ack_run = 0;
        }
        obs.duplicate_ack_run = dir.duplicate_ack_run;
        dir.last_ack = if tcp.flags.ack {
            Some(tcp.acknowledgment)
        } else {
            None
        };

        if tcp.flags.rst {
            debug!("packet {}: reset of flow 0x{:x}", packet.id, flow_id);
            obs.reset = true;
            self.resets += 1;
            self.remove_flow(flow_id);
        }
        Some(obs)
    }

    /// Observe a packet and record the result in its flags
    pub fn annotate_packet(&mut self, packet: &mut Packet) {
        let obs = match self.observe(packet) {
            Some(obs) => obs,
            None => return,
        };
        packet.flags.is_retransmission = obs.retransmission;
        packet.flags.is_duplicate_ack = obs.duplicate_ack;
        packet.flags.is_reset = obs.reset;
        // a duplicate ACK repeats its sequence number too, so it names the packet
        if obs.duplicate_ack {
            packet.info.insert_str(0, "[TCP Dup ACK] ");
        } else if obs.retransmission {
            packet.info.insert_str(0, "[TCP Retransmission] ");
        }
    }
}

/// Set the TCP flags of packets built outside the pipeline, in order
pub fn annotate(packets: &mut [Packet], config: ConnectionConfig) {
    let mut table = ConnectionTable::with_config(config);
    for packet in packets.iter_mut() {
        table.annotate_packet(packet);
    }
}

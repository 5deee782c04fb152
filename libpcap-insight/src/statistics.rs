//! Streaming statistics over a packet sequence
//!
//! [`StatsAggregator`] can be fed batch by batch while the pipeline runs; the
//! result does not depend on how the packets were split into batches.

use crate::packet::{Packet, Protocol};
use fnv::FnvHashMap;
use libpcap_tools::{Config, Duration};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsConfig {
    /// Number of talker pairs reported
    pub top_talkers: usize,
    /// Number of talker pairs tracked, bounds memory
    pub tracked_pairs: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            top_talkers: 10,
            tracked_pairs: 256,
        }
    }
}

impl StatsConfig {
    pub fn from_config(config: &Config) -> Self {
        let default = StatsConfig::default();
        StatsConfig {
            top_talkers: config
                .get_usize("stats.top_talkers")
                .unwrap_or(default.top_talkers),
            tracked_pairs: config
                .get_usize("stats.tracked_pairs")
                .unwrap_or(default.tracked_pairs),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bandwidth {
    /// Sum of on-wire lengths
    pub total: u64,
    pub bytes_per_second: f64,
    pub bits_per_second: f64,
    pub duration_secs: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Talker {
    pub source: String,
    pub destination: String,
    /// Bytes counted since the pair entered the table
    pub bytes: u64,
    /// Upper bound on bytes of this pair missed while it was not tracked
    pub bytes_error: u64,
    pub packets: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTallies {
    pub retransmissions: usize,
    pub duplicate_acks: usize,
    pub resets: usize,
    pub malformed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketStatistics {
    pub total_packets: usize,
    pub protocol_distribution: BTreeMap<String, usize>,
    pub protocol_bytes: BTreeMap<String, u64>,
    pub bandwidth: Bandwidth,
    pub top_talkers: Vec<Talker>,
    pub errors: ErrorTallies,
    pub first_timestamp: Option<Duration>,
    pub last_timestamp: Option<Duration>,
}

#[derive(Clone, Copy, Default)]
struct Counter {
    packets: u64,
    bytes: u64,
}

/// Space-Saving entry. `count` includes the inherited `error`.
#[derive(Clone, Copy, Default)]
struct TalkerCounter {
    packets: u64,
    count: u64,
    error: u64,
}

/// Space-Saving counter: a bounded table where the smallest entry is
/// replaced, inheriting its count as error, when a new pair arrives on a full table
struct TalkerTable {
    capacity: usize,
    pairs: FnvHashMap<(String, String), TalkerCounter>,
}

impl TalkerTable {
    fn new(capacity: usize) -> Self {
        TalkerTable {
            capacity: capacity.max(1),
            pairs: FnvHashMap::default(),
        }
    }

    fn add(&mut self, source: &str, destination: &str, bytes: u64) {
        let key = (source.to_string(), destination.to_string());
        if let Some(c) = self.pairs.get_mut(&key) {
            c.packets += 1;
            c.count += bytes;
            return;
        }
        let mut counter = TalkerCounter::default();
        if self.pairs.len() >= self.capacity {
            let victim = self
                .pairs
                .iter()
                .min_by(|(ka, a), (kb, b)| a.count.cmp(&b.count).then_with(|| ka.cmp(kb)))
                .map(|(k, c)| (k.clone(), c.count));
            if let Some((k, count)) = victim {
                trace!("talker table full, evicting {} -> {}", k.0, k.1);
                self.pairs.remove(&k);
                counter.count = count;
                counter.error = count;
            }
        }
        counter.packets += 1;
        counter.count += bytes;
        self.pairs.insert(key, counter);
    }

    fn ranked(&self, n: usize) -> Vec<Talker> {
        let mut v: Vec<Talker> = self
            .pairs
            .iter()
            .map(|((source, destination), c)| Talker {
                source: source.clone(),
                destination: destination.clone(),
                bytes: c.count - c.error,
                bytes_error: c.error,
                packets: c.packets,
            })
            .collect();
        v.sort_by(rank);
        v.truncate(n);
        v
    }
}

fn rank(a: &Talker, b: &Talker) -> Ordering {
    b.bytes
        .cmp(&a.bytes)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.destination.cmp(&b.destination))
}

/// Incremental statistics reducer
pub struct StatsAggregator {
    config: StatsConfig,
    total_packets: usize,
    total_bytes: u64,
    protocols: FnvHashMap<Protocol, Counter>,
    talkers: TalkerTable,
    errors: ErrorTallies,
    first_timestamp: Option<Duration>,
    last_timestamp: Option<Duration>,
}

impl StatsAggregator {
    pub fn new(config: StatsConfig) -> Self {
        let talkers = TalkerTable::new(config.tracked_pairs.max(config.top_talkers));
        StatsAggregator {
            config,
            total_packets: 0,
            total_bytes: 0,
            protocols: FnvHashMap::default(),
            talkers,
            errors: ErrorTallies::default(),
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    pub fn update(&mut self, packet: &Packet) {
        let length = u64::from(packet.length);
        self.total_packets += 1;
        self.total_bytes += length;
        let c = self.protocols.entry(packet.protocol).or_default();
        c.packets += 1;
        c.bytes += length;
        if !packet.source.is_empty() || !packet.destination.is_empty() {
            self.talkers.add(&packet.source, &packet.destination, length);
        }

        let flags = &packet.flags;
        self.errors.retransmissions += usize::from(flags.is_retransmission);
        self.errors.duplicate_acks += usize::from(flags.is_duplicate_ack);
        self.errors.resets += usize::from(flags.is_reset);
        self.errors.malformed += usize::from(flags.has_error);

        let ts = packet.timestamp;
        self.first_timestamp = Some(self.first_timestamp.map_or(ts, |t| t.min(ts)));
        self.last_timestamp = Some(self.last_timestamp.map_or(ts, |t| t.max(ts)));
    }

    pub fn update_batch(&mut self, packets: &[Packet]) {
        for packet in packets {
            self.update(packet);
        }
    }

    pub fn finish(self) -> PacketStatistics {
        let mut protocol_distribution = BTreeMap::new();
        let mut protocol_bytes = BTreeMap::new();
        for (proto, c) in self.protocols.iter() {
            protocol_distribution.insert(proto.label().to_string(), c.packets as usize);
            protocol_bytes.insert(proto.label().to_string(), c.bytes);
        }

        let duration_secs = match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => (last - first).as_secs_f64(),
            _ => 0.0,
        };
        let bytes_per_second = if duration_secs > 0.0 {
            self.total_bytes as f64 / duration_secs
        } else {
            0.0
        };

        PacketStatistics {
            total_packets: self.total_packets,
            protocol_distribution,
            protocol_bytes,
            bandwidth: Bandwidth {
                total: self.total_bytes,
                bytes_per_second,
                bits_per_second: bytes_per_second * 8.0,
                duration_secs,
            },
            top_talkers: self.talkers.ranked(self.config.top_talkers),
            errors: self.errors,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
        }
    }
}

/// Statistics of a complete packet list
pub fn compute_statistics(packets: &[Packet], config: &StatsConfig) -> PacketStatistics {
    let mut aggregator = StatsAggregator::new(config.clone());
    aggregator.update_batch(packets);
    aggregator.finish()
}

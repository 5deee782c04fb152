//! Rule-based findings over a complete packet list
//!
//! The analysis needs the whole ordered packet set: it replays the TCP state
//! with its own [`ConnectionTable`], pairs requests with their responses and
//! collects protocol errors. Output only depends on the input packets.

use crate::connection::{ConnectionConfig, ConnectionTable};
use crate::packet::{Packet, Protocol};
use libpcap_tools::{Config, Duration, FiveTuple, ToFiveTuple};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::debug;

/// Packet ids cited in one insight at most
const MAX_CITED: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisConfig {
    /// Request/response delays above this are reported
    pub latency_threshold_ms: f64,
    /// Consecutive duplicate ACKs forming a fast-retransmit indicator
    pub dup_ack_threshold: usize,
    pub max_insights: usize,
    pub connection: ConnectionConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            latency_threshold_ms: 500.0,
            dup_ack_threshold: 3,
            max_insights: 20,
            connection: ConnectionConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_config(config: &Config) -> Self {
        let default = AnalysisConfig::default();
        AnalysisConfig {
            latency_threshold_ms: config
                .get_f64("analysis.latency_threshold_ms")
                .unwrap_or(default.latency_threshold_ms),
            dup_ack_threshold: config
                .get_usize("analysis.dup_ack_threshold")
                .unwrap_or(default.dup_ack_threshold),
            max_insights: config
                .get_usize("analysis.max_insights")
                .unwrap_or(default.max_insights),
            connection: ConnectionConfig::from_config(config),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExchangeKind {
    TcpHandshake,
    Http,
    Dns,
}

impl ExchangeKind {
    fn label(self) -> &'static str {
        match self {
            ExchangeKind::TcpHandshake => "TCP handshake",
            ExchangeKind::Http => "HTTP",
            ExchangeKind::Dns => "DNS",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyIssue {
    /// Response packet
    pub packet_id: usize,
    pub request_id: usize,
    pub source: String,
    pub destination: String,
    pub timestamp: Duration,
    pub latency_ms: f64,
    pub kind: ExchangeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProtocolErrorKind {
    Dns,
    Http,
    TcpReset,
    Malformed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub description: String,
    pub timestamp: Duration,
    pub packet_id: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketLoss {
    pub retransmissions: usize,
    pub duplicate_acks: usize,
    pub resets: usize,
    /// Retransmitted segments over TCP segments
    pub retransmission_rate: f64,
    /// Flows with at least `dup_ack_threshold` consecutive duplicate ACKs
    pub fast_retransmit_flows: Vec<FiveTuple>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub text: String,
    pub packet_ids: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub insights: Vec<Insight>,
    pub latency_issues: Vec<LatencyIssue>,
    pub errors: Vec<ProtocolError>,
    pub packet_loss: PacketLoss,
}

struct Pending {
    id: usize,
    timestamp: Duration,
    dns_id: Option<u16>,
    /// Request line, for HTTP
    detail: Option<String>,
}

/// A closed request/response pair
struct Exchange {
    kind: ExchangeKind,
    request_id: usize,
    response_id: usize,
    latency_ms: f64,
    detail: Option<String>,
}

enum Role {
    Request(ExchangeKind),
    Response(ExchangeKind),
}

fn role(packet: &Packet) -> Option<Role> {
    let layers = &packet.layers;
    if let Some(http) = layers.http() {
        return Some(if http.is_request() {
            Role::Request(ExchangeKind::Http)
        } else {
            Role::Response(ExchangeKind::Http)
        });
    }
    if let Some(dns) = layers.dns() {
        return Some(if dns.is_response {
            Role::Response(ExchangeKind::Dns)
        } else {
            Role::Request(ExchangeKind::Dns)
        });
    }
    let tcp = layers.tcp()?;
    match (tcp.flags.syn, tcp.flags.ack) {
        (true, false) => Some(Role::Request(ExchangeKind::TcpHandshake)),
        (true, true) => Some(Role::Response(ExchangeKind::TcpHandshake)),
        _ => None,
    }
}

/// Pairs requests with the next matching response on the reversed tuple
#[derive(Default)]
struct LatencyTracker {
    pending: HashMap<(FiveTuple, ExchangeKind), VecDeque<Pending>>,
    exchanges: Vec<Exchange>,
}

impl LatencyTracker {
    fn update(&mut self, packet: &Packet, five_t: &FiveTuple) -> Option<&Exchange> {
        let dns_id = packet.layers.dns().map(|dns| dns.id);
        match role(packet)? {
            Role::Request(kind) => {
                let detail = packet.layers.http().map(|http| http.summary());
                self.pending
                    .entry((five_t.clone(), kind))
                    .or_default()
                    .push_back(Pending {
                        id: packet.id,
                        timestamp: packet.timestamp,
                        dns_id,
                        detail,
                    });
                None
            }
            Role::Response(kind) => {
                let queue = self.pending.get_mut(&(five_t.get_reverse(), kind))?;
                let pos = match kind {
                    ExchangeKind::Dns => queue.iter().position(|p| p.dns_id == dns_id)?,
                    _ => 0,
                };
                let request = queue.remove(pos)?;
                let latency_ms = packet.timestamp.millis_since(request.timestamp);
                self.exchanges.push(Exchange {
                    kind,
                    request_id: request.id,
                    response_id: packet.id,
                    latency_ms,
                    detail: request.detail,
                });
                self.exchanges.last()
            }
        }
    }
}

fn cite(ids: &[usize]) -> String {
    let mut s: Vec<String> = ids.iter().take(MAX_CITED).map(|id| format!("#{}", id)).collect();
    if ids.len() > MAX_CITED {
        s.push("...".to_string());
    }
    s.join(", ")
}

fn cited(ids: &[usize]) -> Vec<usize> {
    ids.iter().take(MAX_CITED).copied().collect()
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

/// Everything gathered in the single pass over the packets
#[derive(Default)]
struct Findings {
    retransmitted: Vec<usize>,
    duplicate_acks: Vec<usize>,
    resets: Vec<usize>,
    tcp_segments: usize,
    fast_retransmit_flows: BTreeSet<FiveTuple>,
    conversations: BTreeSet<FiveTuple>,
    protocols: BTreeMap<Protocol, usize>,
    dns_failures: Vec<(usize, String)>,
    http_errors: Vec<(usize, String)>,
    malformed: Vec<usize>,
    server_names: Vec<(String, usize)>,
}

/// Run every heuristic over `packets`, in capture order
pub fn analyze(packets: &[Packet], config: &AnalysisConfig) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    let mut f = Findings::default();
    let mut table = ConnectionTable::with_config(config.connection);
    let mut latency = LatencyTracker::default();

    for packet in packets {
        *f.protocols.entry(packet.protocol).or_insert(0) += 1;
        let five_t = packet.get_five_tuple();

        if let Some(ref t5) = five_t {
            // both directions count as one conversation
            f.conversations.insert(t5.canonical());
        }

        if let Some(obs) = table.observe(packet) {
            f.tcp_segments += 1;
            if obs.retransmission {
                f.retransmitted.push(packet.id);
            }
            if obs.duplicate_ack {
                f.duplicate_acks.push(packet.id);
            }
            if obs.duplicate_ack_run >= config.dup_ack_threshold.max(1) {
                if let Some(ref t5) = five_t {
                    f.fast_retransmit_flows.insert(t5.clone());
                }
            }
            if obs.reset {
                f.resets.push(packet.id);
                let description = match five_t {
                    Some(ref t5) => format!("Connection reset: {}", t5),
                    None => "Connection reset".to_string(),
                };
                result.errors.push(ProtocolError {
                    kind: ProtocolErrorKind::TcpReset,
                    description,
                    timestamp: packet.timestamp,
                    packet_id: packet.id,
                });
            }
        }

        let mut request_detail = None;
        if let Some(ref t5) = five_t {
            if let Some(exchange) = latency.update(packet, t5) {
                request_detail = exchange.detail.clone();
                if exchange.latency_ms > config.latency_threshold_ms {
                    debug!(
                        "packet {}: {} latency {:.3} ms",
                        packet.id,
                        exchange.kind.label(),
                        exchange.latency_ms
                    );
                    result.latency_issues.push(LatencyIssue {
                        packet_id: packet.id,
                        request_id: exchange.request_id,
                        source: packet.source.clone(),
                        destination: packet.destination.clone(),
                        timestamp: packet.timestamp,
                        latency_ms: exchange.latency_ms,
                        kind: exchange.kind,
                    });
                }
            }
        }

        if let Some(dns) = packet.layers.dns() {
            if dns.rcode != 0 {
                let name = dns.query_name().unwrap_or("<no question>");
                let description = format!(
                    "DNS {} for {} (id 0x{:04x})",
                    dns.rcode_name(),
                    name,
                    dns.id
                );
                f.dns_failures
                    .push((packet.id, format!("{} ({})", name, dns.rcode_name())));
                result.errors.push(ProtocolError {
                    kind: ProtocolErrorKind::Dns,
                    description,
                    timestamp: packet.timestamp,
                    packet_id: packet.id,
                });
            }
        }

        if let Some(http) = packet.layers.http() {
            if let Some(status) = http.status_code().filter(|s| *s >= 400) {
                let mut description = format!("HTTP {}", http.summary());
                if let Some(request) = request_detail {
                    description.push_str(&format!(" for {}", request));
                }
                f.http_errors.push((packet.id, status.to_string()));
                result.errors.push(ProtocolError {
                    kind: ProtocolErrorKind::Http,
                    description,
                    timestamp: packet.timestamp,
                    packet_id: packet.id,
                });
            }
        }

        if let Some(sni) = packet.layers.tls().and_then(|tls| tls.sni.as_ref()) {
            if !f.server_names.iter().any(|(name, _)| name == sni) {
                f.server_names.push((sni.clone(), packet.id));
            }
        }

        if packet.flags.has_error {
            f.malformed.push(packet.id);
            let description = packet
                .warnings
                .iter()
                .find(|w| w.is_error())
                .map(|w| w.to_string())
                .unwrap_or_else(|| "malformed packet".to_string());
            result.errors.push(ProtocolError {
                kind: ProtocolErrorKind::Malformed,
                description,
                timestamp: packet.timestamp,
                packet_id: packet.id,
            });
        }
    }

    result.packet_loss = PacketLoss {
        retransmissions: f.retransmitted.len(),
        duplicate_acks: f.duplicate_acks.len(),
        resets: f.resets.len(),
        retransmission_rate: if f.tcp_segments > 0 {
            f.retransmitted.len() as f64 / f.tcp_segments as f64
        } else {
            0.0
        },
        fast_retransmit_flows: f.fast_retransmit_flows.iter().cloned().collect(),
    };
    result.insights = insights(packets, &f, &latency.exchanges, config);
    result
}

fn insights(
    packets: &[Packet],
    f: &Findings,
    exchanges: &[Exchange],
    config: &AnalysisConfig,
) -> Vec<Insight> {
    let mut out = Vec::new();
    if packets.is_empty() {
        return out;
    }
    let mut push = |text: String, ids: Vec<usize>| {
        out.push(Insight {
            text,
            packet_ids: ids,
        })
    };

    push(
        format!(
            "Capture contains {} across {}",
            plural(packets.len(), "packet"),
            plural(f.conversations.len(), "TCP/UDP conversation")
        ),
        Vec::new(),
    );

    // highest count, ties broken by protocol order
    if let Some((proto, count)) = f
        .protocols
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
    {
        push(
            format!(
                "{} is the dominant protocol with {:.1}% of packets ({}/{})",
                proto,
                *count as f64 * 100.0 / packets.len() as f64,
                count,
                packets.len()
            ),
            Vec::new(),
        );
    }

    if !f.retransmitted.is_empty() {
        push(
            format!(
                "{} detected ({:.1}% of TCP segments): {}",
                plural(f.retransmitted.len(), "TCP retransmission"),
                f.retransmitted.len() as f64 * 100.0 / f.tcp_segments as f64,
                cite(&f.retransmitted)
            ),
            cited(&f.retransmitted),
        );
    }

    if !f.duplicate_acks.is_empty() {
        push(
            format!(
                "{} seen, {} reached {} in a row: {}",
                plural(f.duplicate_acks.len(), "duplicate ACK"),
                plural(f.fast_retransmit_flows.len(), "flow"),
                config.dup_ack_threshold,
                cite(&f.duplicate_acks)
            ),
            cited(&f.duplicate_acks),
        );
    }

    if !f.resets.is_empty() {
        push(
            format!(
                "{} reset: {}",
                if f.resets.len() == 1 {
                    "1 connection was".to_string()
                } else {
                    format!("{} connections were", f.resets.len())
                },
                cite(&f.resets)
            ),
            cited(&f.resets),
        );
    }

    for (id, failure) in f.dns_failures.iter().take(MAX_CITED) {
        push(format!("DNS lookup failed for {}: #{}", failure, id), vec![*id]);
    }

    for (id, status) in f.http_errors.iter().take(MAX_CITED) {
        push(format!("HTTP error status {} in response #{}", status, id), vec![*id]);
    }

    // largest latency, earliest response on ties
    if let Some(slowest) = exchanges.iter().max_by(|a, b| {
        a.latency_ms
            .total_cmp(&b.latency_ms)
            .then_with(|| b.response_id.cmp(&a.response_id))
    }) {
        push(
            format!(
                "Slowest exchange: {} took {:.3} ms (#{} → #{})",
                slowest.kind.label(),
                slowest.latency_ms,
                slowest.request_id,
                slowest.response_id
            ),
            vec![slowest.request_id, slowest.response_id],
        );
    }

    if !f.server_names.is_empty() {
        let names: Vec<String> = f
            .server_names
            .iter()
            .map(|(name, id)| format!("{} (#{})", name, id))
            .collect();
        push(
            format!("TLS server names: {}", names.join(", ")),
            f.server_names.iter().map(|(_, id)| *id).collect(),
        );
    }

    if !f.malformed.is_empty() {
        push(
            format!(
                "{} could not be fully decoded: {}",
                plural(f.malformed.len(), "packet"),
                cite(&f.malformed)
            ),
            cited(&f.malformed),
        );
    }

    out.truncate(config.max_insights);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_result() {
        let result = analyze(&[], &AnalysisConfig::default());
        assert_eq!(result, AnalysisResult::default());
        assert_eq!(result.packet_loss.retransmission_rate, 0.0);
    }

    #[test]
    fn citations_are_capped() {
        assert_eq!(cite(&[1, 2]), "#1, #2");
        assert_eq!(cite(&[1, 2, 3, 4, 5, 6, 7]), "#1, #2, #3, #4, #5, ...");
        assert_eq!(cited(&[1, 2, 3, 4, 5, 6, 7]).len(), MAX_CITED);
    }
}

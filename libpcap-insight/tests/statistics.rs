mod common;

use common::*;
use libpcap_insight::*;

fn packets() -> Vec<Packet> {
    parse_capture(&mixed_capture(), &PipelineConfig::default())
        .expect("valid capture")
        .packets
}

#[test]
fn distribution_covers_every_packet() {
    let packets = packets();
    let stats = compute_statistics(&packets, &StatsConfig::default());
    assert_eq!(stats.total_packets, packets.len());
    assert_eq!(
        stats.protocol_distribution.values().sum::<usize>(),
        stats.total_packets
    );
    assert_eq!(stats.protocol_distribution.get("DNS"), Some(&2));
    assert_eq!(stats.protocol_distribution.get("HTTP"), Some(&2));
    assert_eq!(stats.protocol_distribution.get("TCP"), Some(&4));

    let total: u64 = packets.iter().map(|p| u64::from(p.length)).sum();
    assert_eq!(stats.bandwidth.total, total);
    assert_eq!(stats.protocol_bytes.values().sum::<u64>(), total);
}

#[test]
fn bandwidth_uses_capture_duration() {
    let packets = packets();
    let stats = compute_statistics(&packets, &StatsConfig::default());
    assert!((stats.bandwidth.duration_secs - 0.110).abs() < 1e-9);
    let expected = stats.bandwidth.total as f64 / 0.110;
    assert!((stats.bandwidth.bytes_per_second - expected).abs() < 1e-6);
    assert!((stats.bandwidth.bits_per_second - expected * 8.0).abs() < 1e-6);
}

#[test]
fn top_talkers_ranked_by_bytes() {
    let packets = packets();
    let stats = compute_statistics(
        &packets,
        &StatsConfig {
            top_talkers: 2,
            ..StatsConfig::default()
        },
    );
    assert_eq!(stats.top_talkers.len(), 2);
    assert!(stats.top_talkers[0].bytes >= stats.top_talkers[1].bytes);
    assert_eq!(stats.top_talkers[0].source, "192.168.1.10");
    assert_eq!(stats.top_talkers[0].destination, "93.184.216.34");
}

#[test]
fn incremental_matches_batch() {
    let packets = packets();
    let mut aggregator = StatsAggregator::new(StatsConfig::default());
    for chunk in packets.chunks(3) {
        aggregator.update_batch(chunk);
    }
    assert_eq!(
        aggregator.finish(),
        compute_statistics(&packets, &StatsConfig::default())
    );
}

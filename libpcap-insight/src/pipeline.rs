//! Reader → Dissector → decoders → TCP annotation, in batches
//!
//! [`Pipeline::spawn`] runs the pass on a dedicated thread and sends batches
//! of packets over a bounded channel. [`parse_capture`] runs the same pass on
//! the calling thread.

use crate::connection::{ConnectionConfig, ConnectionTable};
use crate::dissector::{Dissector, DissectorConfig};
use crate::packet::Packet;
use crossbeam_channel::{bounded, Receiver, Sender};
use libpcap_tools::{count_records, CaptureInfo, CaptureReader, Config, Duration, Error};
use serde::Serialize;
use std::mem;
use std::thread;
use tracing::{debug, error, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Packets per progress batch
    pub batch_size: usize,
    /// Batches in flight between the worker and the consumer
    pub channel_capacity: usize,
    pub dissector: DissectorConfig,
    pub connection: ConnectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            batch_size: 100,
            channel_capacity: 16,
            dissector: DissectorConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let default = PipelineConfig::default();
        PipelineConfig {
            batch_size: config
                .get_usize("pipeline.batch_size")
                .unwrap_or(default.batch_size),
            channel_capacity: config
                .get_usize("pipeline.channel_capacity")
                .unwrap_or(default.channel_capacity),
            dissector: DissectorConfig::from_config(config),
            connection: ConnectionConfig::from_config(config),
        }
    }
}

/// A group of consecutive packets
#[derive(Debug)]
pub struct Batch {
    /// Packets in ascending id order
    pub packets: Vec<Packet>,
    /// Packets emitted so far, this batch included
    pub current: usize,
    /// Best-effort number of records in the capture
    pub total: Option<usize>,
}

#[derive(Debug)]
pub enum PipelineMessage {
    Progress(Batch),
    /// No further batches
    Complete,
    /// Fatal error, nothing else follows
    Error(String),
}

/// Outcome of a pass over the capture
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub info: CaptureInfo,
    /// Complete records read
    pub records: usize,
    /// The capture ended with an incomplete record
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCapture {
    pub packets: Vec<Packet>,
    pub info: CaptureInfo,
    pub truncated: bool,
}

/// Iterator over the packets of a capture
struct PacketStream<'a> {
    reader: CaptureReader<'a>,
    dissector: Dissector,
    connections: ConnectionTable,
    last_ts: Option<Duration>,
}

impl<'a> PacketStream<'a> {
    fn new(data: &'a [u8], config: &PipelineConfig) -> Result<Self, Error> {
        let reader = CaptureReader::new(data)?;
        Ok(PacketStream {
            reader,
            dissector: Dissector::new(&config.dissector),
            connections: ConnectionTable::with_config(config.connection),
            last_ts: None,
        })
    }

    fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            info: self.reader.info().clone(),
            records: self.reader.records(),
            truncated: self.reader.truncated(),
        }
    }
}

impl<'a> Iterator for PacketStream<'a> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let frame = self.reader.next()?;
        let mut packet = self.dissector.dissect(&frame, frame.index);
        if let Some(last) = self.last_ts {
            packet.clamp_timestamp(last);
        }
        self.last_ts = Some(packet.timestamp);
        self.connections.annotate_packet(&mut packet);
        Some(packet)
    }
}

/// Parse a whole capture on the calling thread
pub fn parse_capture(data: &[u8], config: &PipelineConfig) -> Result<ParsedCapture, Error> {
    let mut stream = PacketStream::new(data, config)?;
    let packets: Vec<Packet> = stream.by_ref().collect();
    let summary = stream.summary();
    info!(
        "parsed {} packets{}",
        packets.len(),
        if summary.truncated { " (truncated)" } else { "" }
    );
    Ok(ParsedCapture {
        packets,
        info: summary.info,
        truncated: summary.truncated,
    })
}

pub struct Pipeline;

impl Pipeline {
    /// Start a worker thread parsing `data`
    pub fn spawn(data: Vec<u8>, config: PipelineConfig) -> Result<PipelineHandle, Error> {
        let (sender, receiver) = bounded(config.channel_capacity.max(1));
        let worker = thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || run_worker(&data, &config, &sender))?;
        Ok(PipelineHandle { receiver, worker })
    }
}

fn run_worker(
    data: &[u8],
    config: &PipelineConfig,
    sender: &Sender<PipelineMessage>,
) -> Result<CaptureSummary, Error> {
    debug!("pipeline worker starting");
    let mut stream = match PacketStream::new(data, config) {
        Ok(stream) => stream,
        Err(e) => {
            error!("pipeline: {}", e);
            // the consumer may already be gone
            let _ = sender.send(PipelineMessage::Error(e.to_string()));
            return Err(e);
        }
    };
    let total = count_records(data).ok();
    let batch_size = config.batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut current = 0;

    for packet in stream.by_ref() {
        batch.push(packet);
        current += 1;
        if batch.len() == batch_size {
            let packets = mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if !send_batch(sender, packets, current, total) {
                return Ok(stream.summary());
            }
        }
    }
    if !batch.is_empty() && !send_batch(sender, batch, current, total) {
        return Ok(stream.summary());
    }
    let summary = stream.summary();
    info!(
        "pipeline complete: {} records{}",
        summary.records,
        if summary.truncated { " (truncated)" } else { "" }
    );
    let _ = sender.send(PipelineMessage::Complete);
    Ok(summary)
}

/// false if the consumer has gone away
fn send_batch(
    sender: &Sender<PipelineMessage>,
    packets: Vec<Packet>,
    current: usize,
    total: Option<usize>,
) -> bool {
    debug!("pipeline: batch of {} ({}/{:?})", packets.len(), current, total);
    let batch = Batch {
        packets,
        current,
        total,
    };
    match sender.send(PipelineMessage::Progress(batch)) {
        Ok(()) => true,
        Err(_) => {
            info!("pipeline cancelled after {} packets", current);
            false
        }
    }
}

/// Consumer side of a running pipeline
pub struct PipelineHandle {
    receiver: Receiver<PipelineMessage>,
    worker: thread::JoinHandle<Result<CaptureSummary, Error>>,
}

impl PipelineHandle {
    /// The raw channel, for consumers that wait with a timeout or `select!`
    pub fn receiver(&self) -> &Receiver<PipelineMessage> {
        &self.receiver
    }

    /// Next message, or `None` once the worker has exited and the channel is drained
    pub fn recv(&self) -> Option<PipelineMessage> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> crossbeam_channel::Iter<'_, PipelineMessage> {
        self.receiver.iter()
    }

    /// Wait for the worker. Pending messages are dropped, which cancels a
    /// worker still producing.
    pub fn join(self) -> Result<CaptureSummary, Error> {
        let PipelineHandle { receiver, worker } = self;
        drop(receiver);
        worker
            .join()
            .map_err(|_| Error::Generic("pipeline worker panicked"))?
    }

    /// Drain every batch, then wait for the worker
    pub fn collect(self) -> Result<ParsedCapture, Error> {
        let mut packets = Vec::new();
        for msg in self.iter() {
            match msg {
                PipelineMessage::Progress(batch) => packets.extend(batch.packets),
                PipelineMessage::Complete | PipelineMessage::Error(_) => break,
            }
        }
        let summary = self.join()?;
        Ok(ParsedCapture {
            packets,
            info: summary.info,
            truncated: summary.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pcap() -> Vec<u8> {
        let mut v = vec![0xd4, 0xc3, 0xb2, 0xa1, 2, 0, 4, 0];
        v.extend_from_slice(&[0; 8]);
        v.extend_from_slice(&65535u32.to_le_bytes());
        v.extend_from_slice(&1u32.to_le_bytes());
        v
    }

    #[test]
    fn empty_capture_completes() {
        let handle = Pipeline::spawn(empty_pcap(), PipelineConfig::default()).expect("spawn");
        assert!(matches!(handle.recv(), Some(PipelineMessage::Complete)));
        let summary = handle.join().expect("summary");
        assert_eq!(summary.records, 0);
        assert!(!summary.truncated);
    }

    #[test]
    fn bad_magic_sends_error() {
        let handle = Pipeline::spawn(vec![0u8; 32], PipelineConfig::default()).expect("spawn");
        match handle.recv() {
            Some(PipelineMessage::Error(msg)) => assert!(!msg.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(handle.recv().is_none());
        assert!(handle.join().is_err());
    }

    #[test]
    fn receiver_waits_with_timeout() {
        let handle = Pipeline::spawn(empty_pcap(), PipelineConfig::default()).expect("spawn");
        let msg = handle
            .receiver()
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("message before timeout");
        assert!(matches!(msg, PipelineMessage::Complete));
        assert_eq!(handle.join().expect("summary").records, 0);
    }
}

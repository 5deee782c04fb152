//! Capture dissection, statistics and analysis
//!
//! A capture held in memory goes through [`Pipeline::spawn`] (worker thread,
//! batched messages) or [`parse_capture`] (same pass, inline) and becomes a
//! list of [`Packet`]s. The derived views are pure functions of that list:
//! [`compute_statistics`] and [`analyze`].
//!
//! ```no_run
//! use libpcap_insight::*;
//!
//! let data = std::fs::read("capture.pcap").expect("read");
//! let parsed = parse_capture(&data, &PipelineConfig::default()).expect("valid capture");
//! let stats = compute_statistics(&parsed.packets, &StatsConfig::default());
//! let analysis = analyze(&parsed.packets, &AnalysisConfig::default());
//! println!("{} packets, {} insights", stats.total_packets, analysis.insights.len());
//! ```

mod analysis;
mod connection;
pub mod decoders;
mod dissector;
mod layers;
mod packet;
mod pipeline;
mod statistics;

pub use analysis::*;
pub use connection::*;
pub use dissector::{Dissector, DissectorConfig};
pub use layers::*;
pub use packet::*;
pub use pipeline::*;
pub use statistics::*;

pub use decoders::dns::DnsLayer;
pub use decoders::http::HttpLayer;
pub use decoders::tls::TlsLayer;

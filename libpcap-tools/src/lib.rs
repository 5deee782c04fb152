//! Capture file reader and base types for pcap-insight
//!
//! The entry point is [`CaptureReader`], which walks a pcap or pcap-ng capture
//! held in memory and yields [`Frame`]s.

#[macro_use]
extern crate log;

mod config;
mod context;
mod duration;
mod error;
mod five_tuple;
mod flow;
mod reader;

pub use config::Config;
pub use context::*;
pub use duration::{Duration, MICROS_PER_SEC};
pub use error::*;
pub use five_tuple::*;
pub use flow::*;
pub use reader::*;

pub use pcap_parser::Linktype;

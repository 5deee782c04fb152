#![warn(clippy::all)]

#[macro_use]
extern crate log;

extern crate clap;
use clap::{crate_version, Parser};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

extern crate flate2;
extern crate lz4;
extern crate xz2;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Serialize;
use xz2::read::XzDecoder;

use libpcap_insight::*;
use libpcap_tools::{Config, Error};

/// Pcap file dissection and analysis tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Packets per progress batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Latency threshold for request/response pairs, in milliseconds
    #[arg(short, long, value_name = "MS")]
    latency_threshold: Option<f64>,

    /// Number of top talkers to report
    #[arg(short, long)]
    top: Option<usize>,

    /// Include the packet list in the report
    #[arg(short, long)]
    packets: bool,

    /// Write report.json (and the log file) in this directory
    #[arg(short, long)]
    outdir: Option<String>,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Input file, `-` for stdin
    input: Option<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    capture: CaptureSummary,
    statistics: PacketStatistics,
    analysis: AnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    packets: Option<&'a [Packet]>,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn to_io_error(e: Error) -> io::Error {
    match e {
        Error::Io(e) => e,
        e => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("PCAP_INSIGHT_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(default_level.into()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .compact();
    match config.get("log_file") {
        Some(log_file) => {
            let output_dir = config.get("output_dir").unwrap_or(".");
            let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, log_file);
            builder.with_writer(file_appender).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
}

fn read_input(input_filename: &str) -> io::Result<Vec<u8>> {
    let mut input_reader = if input_filename == "-" {
        Box::new(io::stdin())
    } else {
        let path = Path::new(input_filename);
        let file = File::open(path)?;
        if input_filename.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else if input_filename.ends_with(".xz") {
            Box::new(XzDecoder::new(file))
        } else if input_filename.ends_with(".lz4") {
            Box::new(lz4::Decoder::new(file)?)
        } else {
            Box::new(file) as Box<dyn io::Read>
        }
    };
    let mut data = Vec::new();
    input_reader.read_to_end(&mut data)?;
    Ok(data)
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename).map_err(to_io_error)?;
    }
    // override config options from command-line arguments
    if let Some(n) = args.batch_size {
        config.set("pipeline.batch_size", n as i64).map_err(to_io_error)?;
    }
    if let Some(ms) = args.latency_threshold {
        config
            .set("analysis.latency_threshold_ms", ms)
            .map_err(to_io_error)?;
    }
    if let Some(n) = args.top {
        config.set("stats.top_talkers", n as i64).map_err(to_io_error)?;
    }
    if let Some(dir) = args.outdir.as_ref() {
        config.set("output_dir", dir.as_str()).map_err(to_io_error)?;
    }

    init_logging(&config, args.verbose);

    // Now, really start
    info!("Pcap insight {}", crate_version!());

    let input_filename = match args.input.as_ref() {
        Some(s) => s.as_str(),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Input file name cannot be empty",
            ));
        }
    };
    let data = read_input(input_filename)?;
    debug!("read {} bytes from {}", data.len(), input_filename);

    let pipeline_config = PipelineConfig::from_config(&config);
    let analysis_config = AnalysisConfig::from_config(&config);
    let mut aggregator = StatsAggregator::new(StatsConfig::from_config(&config));

    let handle = Pipeline::spawn(data, pipeline_config).map_err(to_io_error)?;
    let mut packets = Vec::new();
    let mut failure = None;
    for msg in handle.iter() {
        match msg {
            PipelineMessage::Progress(batch) => {
                match batch.total {
                    Some(total) => debug!("progress: {}/{} packets", batch.current, total),
                    None => debug!("progress: {} packets", batch.current),
                }
                aggregator.update_batch(&batch.packets);
                packets.extend(batch.packets);
            }
            PipelineMessage::Complete => break,
            PipelineMessage::Error(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    let summary = handle.join();
    if let Some(e) = failure {
        error!("{}: {}", input_filename, e);
        return Err(io::Error::new(io::ErrorKind::InvalidData, e));
    }
    let summary = summary.map_err(to_io_error)?;
    if summary.truncated {
        warn!("{}: capture ends with an incomplete record", input_filename);
    }

    let statistics = aggregator.finish();
    let analysis = analyze(&packets, &analysis_config);
    for insight in &analysis.insights {
        info!("insight: {}", insight.text);
    }

    let report = Report {
        capture: summary,
        statistics,
        analysis,
        packets: if args.packets {
            Some(packets.as_slice())
        } else {
            None
        },
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    match config.get("output_dir") {
        Some(dir) => {
            let path = Path::new(dir).join("report.json");
            let mut file = File::create(&path)?;
            file.write_all(json.as_bytes())?;
            info!("report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    info!("pcap-insight: done, exiting");
    Ok(())
}

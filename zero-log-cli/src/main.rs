//! Zero Log CLI Application
//!
//! This is the command-line interface for the Zero Motorcycles log decoder.
//! It uses the zero-log-decoder library and adds:
//! - MBB/BMS detection from the dump or its file name
//! - Parallel decoding of several dumps
//! - Text summaries and JSON export

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use zero_log_decoder::{filename_vin, sniff_category, DecodeResult, Decoder, LayoutKind, LogCategory};

mod config;
mod report;

/// Default number of entries listed per file
const DEFAULT_LIMIT: usize = 20;

/// Zero Log Decoder - Decode Zero Motorcycles MBB/BMS event logs
#[derive(Parser, Debug)]
#[command(name = "zero-log-cli")]
#[command(about = "Decode Zero Motorcycles MBB/BMS binary event logs", long_about = None)]
#[command(version)]
struct Args {
    /// Log dump(s) to decode
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Controller that produced the logs (detected from content or file name if omitted)
    #[arg(long, value_enum)]
    category: Option<CategoryArg>,

    /// Skip layout detection and decode with this layout
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    /// Path to configuration file (TOML with [decoder] and [output] tables)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write one JSON document per input file into this directory
    #[arg(long, value_name = "DIR")]
    json: Option<PathBuf>,

    /// Number of newest entries listed per file
    #[arg(long, value_name = "COUNT")]
    limit: Option<usize>,

    /// Correct MBB timestamps by the fixed GMT-7 hardware clock offset
    #[arg(long)]
    mbb_offset: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Mbb,
    Bms,
}

impl From<CategoryArg> for LogCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Mbb => LogCategory::Mbb,
            CategoryArg::Bms => LogCategory::Bms,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayoutArg {
    Legacy,
    Ring,
    Compressed,
}

impl From<LayoutArg> for LayoutKind {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Legacy => LayoutKind::Legacy,
            LayoutArg::Ring => LayoutKind::RingBuffer2024,
            LayoutArg::Compressed => LayoutKind::CompressedTelemetry2025,
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Zero Log CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", zero_log_decoder::VERSION);

    let app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => config::AppConfig::default(),
    };

    let mut decoder_config = app_config.decoder;
    if args.mbb_offset {
        decoder_config.apply_mbb_offset = true;
    }
    let decoder = Decoder::new(decoder_config);
    let category = args.category.map(LogCategory::from);
    let layout = args.layout.map(LayoutKind::from);
    let json_dir = args.json.clone().or(app_config.output.json_dir);
    let limit = args.limit.or(app_config.output.limit).unwrap_or(DEFAULT_LIMIT);

    // Decode in parallel, report in input order
    let results: Vec<Result<DecodeResult>> = args
        .files
        .par_iter()
        .map(|path| decode_one(&decoder, path, category, layout))
        .collect();

    let mut failed = 0;
    for (path, result) in args.files.iter().zip(results) {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                failed += 1;
                continue;
            }
        };

        if !args.quiet {
            println!("{}", report::render_summary(path, &result, limit));
        }
        if let Some(dir) = &json_dir {
            let out = report::write_json(dir, path, &result)?;
            log::info!("Wrote {:?}", out);
        }
    }

    if failed > 0 {
        bail!("{} of {} files could not be decoded", failed, args.files.len());
    }
    Ok(())
}

/// Read and decode one dump, working out its category when not given
fn decode_one(
    decoder: &Decoder,
    path: &Path,
    category: Option<LogCategory>,
    layout: Option<LayoutKind>,
) -> Result<DecodeResult> {
    let buf = fs::read(path).with_context(|| format!("Failed to read log file: {:?}", path))?;

    let name = path.to_str();
    let category = match category.or_else(|| sniff_category(&buf, name)) {
        Some(category) => category,
        None => bail!(
            "Cannot tell whether {:?} is an MBB or a BMS log; pass --category",
            path
        ),
    };

    let mut result = decoder
        .decode(&buf, category, layout)
        .with_context(|| format!("Failed to decode {:?}", path))?;
    if result.header.vin.is_none() {
        result.header.vin = name.and_then(filename_vin);
    }
    Ok(result)
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

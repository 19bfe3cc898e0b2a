//! structloop Command Line Interface
//!
//! Usage:
//!   structloop [OPTIONS] <input-file>
//!   structloop --help
//!
//! Examples:
//!   structloop kernel.sl                          # Peel every loop
//!   structloop --tile-sizes=4,0 kernel.sl         # Tile generic ops, then peel
//!   structloop --peel=none --tile-sizes=8 k.sl    # Tile only
//!   structloop --label=hot --report kernel.sl     # Only labeled ops, JSON report on stderr

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use structloop::transform::{PeelMode, Pipeline, PipelineConfig};

/// structloop - Structured Loop Peeling and Standalone Tiling
#[derive(Parser, Debug)]
#[command(name = "structloop")]
#[command(version)]
#[command(about = "Peels and tiles structured loop nests", long_about = None)]
struct Cli {
    /// Input file in textual IR format
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Pipeline configuration as JSON; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tile sizes for generic ops (comma-separated, 0 = untiled)
    #[arg(long, value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
    tile_sizes: Option<Vec<i64>>,

    /// Loop dimensions to peel: all, none or a dimension index
    #[arg(long, value_name = "MODE")]
    peel: Option<PeelMode>,

    /// Only transform ops carrying this label
    #[arg(long)]
    label: Option<String>,

    /// Maximum number of peeling scans
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Skip verification of the transformed function
    #[arg(long)]
    no_verify: bool,

    /// Print a JSON report of the run to stderr
    #[arg(long)]
    report: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("structloop v{}", structloop::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;

    info!("Parsing...");
    let mut func = structloop::parse(&source).with_context(|| format!("Failed to parse {:?}", cli.input))?;

    let config = build_config(&cli)?;
    debug!("Pipeline config: {:?}", config);

    info!("Transforming...");
    let report = Pipeline::new(config).run(&mut func)?;
    for failure in report.failures() {
        warn!("{}", failure);
    }

    if cli.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        eprintln!("{}", json);
    }

    write_output(&cli.output, &structloop::ir::print_function(&func))
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config file: {:?}", path))?
        }
        None => PipelineConfig::default(),
    };

    // Override with CLI flags
    if let Some(ref sizes) = cli.tile_sizes {
        config.tile_sizes = Some(sizes.clone());
    }
    if let Some(peel) = cli.peel {
        config.peel = peel;
    }
    if let Some(ref label) = cli.label {
        config.label = Some(label.clone());
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    if cli.no_verify {
        config.verify = false;
    }

    Ok(config)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}

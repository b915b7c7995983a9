//! Generate a subsecond-offset heatmap from a profiling trace.
//!
//! Reads a trace file from the configured profile directory and writes the
//! per-metric heatmap grids as JSON.
//!
//! # Usage
//!
//! ```bash
//! heatscope perf.txt --format perf
//! heatscope trace.cpuprofile --format cpuprofile --rows 100 -o heatmap.json
//! heatscope perf.txt --format perf --metric cycles --pretty
//! ```

use clap::{Parser, ValueEnum};
use heatscope::{Config, DEFAULT_ROWS, HeatmapEngine};
use heatscope_extract::FileType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Linux `perf script` text output
    Perf,
    /// V8 / Chrome DevTools .cpuprofile JSON
    Cpuprofile,
    /// Chrome Trace Event JSON
    TraceEvent,
    /// Netflix profile document
    Nflxprofile,
}

impl From<Format> for FileType {
    fn from(format: Format) -> Self {
        match format {
            Format::Perf => FileType::Perf,
            Format::Cpuprofile => FileType::Cpuprofile,
            Format::TraceEvent => FileType::TraceEvent,
            Format::Nflxprofile => FileType::Nflxprofile,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "heatscope")]
#[command(about = "Generate subsecond-offset heatmaps from profiling traces")]
#[command(version)]
struct Args {
    /// Trace file name, resolved against the profile directory
    file: String,

    /// Trace format
    #[arg(short, long, value_enum)]
    format: Format,

    /// Number of sub-second rows in the grid
    #[arg(short, long, default_value_t = DEFAULT_ROWS)]
    rows: usize,

    /// Restrict extraction to a single named metric
    #[arg(short, long)]
    metric: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "heatscope.toml")]
    config: PathBuf,

    /// Profile directory (overrides the config file)
    #[arg(short = 'd', long)]
    profile_dir: Option<PathBuf>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load_optional(&args.config);
    if let Some(dir) = args.profile_dir {
        config.profile_dir = dir;
    }

    let engine = HeatmapEngine::new(config);
    let heatmaps = engine.generate_heatmap(
        &args.file,
        args.format.into(),
        Some(args.rows),
        args.metric.as_deref(),
    )?;

    match args.output {
        Some(path) => {
            let file = File::create(&path)
                .map_err(|e| format!("Failed to create output file '{}': {}", path.display(), e))?;
            let mut writer = BufWriter::new(file);
            write_json(&mut writer, &heatmaps, args.pretty)?;
            writer.flush()?;
            eprintln!(
                "Wrote {} heatmap(s) for '{}' to '{}'",
                heatmaps.len(),
                args.file,
                path.display()
            );
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_json(&mut writer, &heatmaps, args.pretty)?;
            writer.flush()?;
        }
    }

    Ok(())
}

fn write_json<W: Write, T: serde::Serialize>(
    writer: &mut W,
    value: &T,
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, value)?;
    } else {
        serde_json::to_writer(&mut *writer, value)?;
    }
    writeln!(writer)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

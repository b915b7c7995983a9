//! Trace extraction for the heatscope heatmap engine.
//!
//! This crate normalizes heterogeneous profiling trace formats behind one
//! extraction contract: each format adapter streams a trace file and yields
//! timestamped events carrying named metric weights, plus the overall
//! `[start, end]` timestamp range of the trace.
//!
//! # Available Adapters
//!
//! - [`perf`] - Linux `perf script` text output
//! - [`cpuprofile`] - V8 / Chrome DevTools `.cpuprofile` JSON
//! - [`trace_event`] - Chrome Trace Event JSON
//! - [`nflxprofile`] - Netflix profile documents
//!
//! Adapters are selected through the closed [`FileType`] enum, which is the
//! single dispatch point over all supported formats.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use heatscope_extract::FileType;
//!
//! let result = FileType::Perf
//!     .extract(Path::new("profiles/perf.txt"), None, None)
//!     .unwrap();
//! println!("{} events in [{}, {}]", result.events.len(), result.start, result.end);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;

pub mod cpuprofile;
pub mod nflxprofile;
pub mod perf;
pub mod trace_event;

/// Metric name of the implicit per-event sample counter.
pub const SAMPLES_METRIC: &str = "samples";

/// Errors that can occur during trace extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("cannot open '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {format} trace: {message}")]
    Malformed {
        format: &'static str,
        message: String,
    },
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// The requested file type is not one of the recognized formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown file type '{0}'")]
pub struct InvalidFileTypeError(pub String);

/// Supported trace formats.
///
/// Dispatch over formats happens here and nowhere else: [`FileType::extract`]
/// selects the adapter module for the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Perf,
    Cpuprofile,
    TraceEvent,
    Nflxprofile,
}

impl FileType {
    /// Whether traces of this format can carry named counter metrics beyond
    /// the implicit `samples` count.
    pub fn carries_counters(&self) -> bool {
        matches!(self, FileType::Perf)
    }

    /// Extract the event stream from `path` using this format's adapter.
    ///
    /// `which` restricts counter scanning to a single named metric (the
    /// implicit `samples` weight is always emitted). `known_mtime` is the
    /// file's modification time as observed by the caller, passed through to
    /// adapters whose format embeds absolute-time semantics.
    pub fn extract(
        &self,
        path: &Path,
        which: Option<&str>,
        known_mtime: Option<SystemTime>,
    ) -> Result<ExtractionResult> {
        match self {
            FileType::Perf => perf::extract(path, which),
            FileType::Cpuprofile => cpuprofile::extract(path),
            FileType::TraceEvent => trace_event::extract(path, known_mtime),
            FileType::Nflxprofile => nflxprofile::extract(path),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Perf => "perf",
            FileType::Cpuprofile => "cpuprofile",
            FileType::TraceEvent => "trace_event",
            FileType::Nflxprofile => "nflxprofile",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = InvalidFileTypeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "perf" => Ok(FileType::Perf),
            "cpuprofile" => Ok(FileType::Cpuprofile),
            "trace_event" => Ok(FileType::TraceEvent),
            "nflxprofile" => Ok(FileType::Nflxprofile),
            other => Err(InvalidFileTypeError(other.to_string())),
        }
    }
}

/// A named metric weight attached to a trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    pub metric: String,
    pub value: f64,
}

impl Weight {
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
        }
    }

    /// The implicit `samples` counter carried by every event.
    pub fn samples() -> Self {
        Self::new(SAMPLES_METRIC, 1.0)
    }
}

/// A single timestamped sample extracted from a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Wall-clock timestamp in seconds.
    pub timestamp: f64,
    /// Metric weights in extraction order, `samples` first.
    pub weights: Vec<Weight>,
}

/// The uniform output of every format adapter.
///
/// `start <= end` always holds; both are `0.0` when the trace contained no
/// non-idle samples and the format declares no time range of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub start: f64,
    pub end: f64,
    pub events: Vec<TraceEvent>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Accumulates events and tracks the observed timestamp range.
///
/// Adapters push events as they stream the input; declared time bounds (for
/// formats that carry them) are merged in via [`expand_range`]. An empty
/// accumulation finishes as the `[0, 0]` range.
///
/// [`expand_range`]: ExtractionBuilder::expand_range
#[derive(Debug)]
pub struct ExtractionBuilder {
    start: f64,
    end: f64,
    events: Vec<TraceEvent>,
}

impl ExtractionBuilder {
    pub fn new() -> Self {
        Self {
            start: f64::INFINITY,
            end: f64::NEG_INFINITY,
            events: Vec::new(),
        }
    }

    /// Widen the trace range to cover `[start, end]`.
    pub fn expand_range(&mut self, start: f64, end: f64) {
        if start < self.start {
            self.start = start;
        }
        if end > self.end {
            self.end = end;
        }
    }

    /// Record one event, widening the range to cover its timestamp.
    pub fn push(&mut self, timestamp: f64, weights: Vec<Weight>) {
        self.expand_range(timestamp, timestamp);
        self.events.push(TraceEvent { timestamp, weights });
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn finish(self) -> ExtractionResult {
        if self.start.is_finite() && self.end.is_finite() {
            ExtractionResult {
                start: self.start,
                end: self.end,
                events: self.events,
            }
        } else {
            ExtractionResult {
                start: 0.0,
                end: 0.0,
                events: self.events,
            }
        }
    }
}

impl Default for ExtractionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Open a trace file for streaming, transparently decompressing gzip and
/// zstd inputs based on their magic bytes.
pub fn open_trace(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|source| ExtractError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let magic = reader.fill_buf()?;

    if magic.starts_with(&GZIP_MAGIC) {
        log::debug!("reading '{}' as gzip", path.display());
        Ok(Box::new(BufReader::new(flate2::bufread::GzDecoder::new(
            reader,
        ))))
    } else if magic.starts_with(&ZSTD_MAGIC) {
        log::debug!("reading '{}' as zstd", path.display());
        Ok(Box::new(BufReader::new(zstd::stream::read::Decoder::with_buffer(reader)?)))
    } else {
        Ok(Box::new(reader))
    }
}

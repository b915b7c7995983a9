//! Subsecond-offset heatmap generation for profiling traces.
//!
//! heatscope converts a stream of profiling events (stack samples or
//! counter readings, in one of several trace formats) into discretized
//! two-dimensional histograms: one grid per tracked metric, columns
//! spanning whole seconds of wall-clock time, rows spanning sub-second
//! offsets. Unchanged files are never re-parsed; extraction results are
//! cached by modification time.
//!
//! # Components
//!
//! - [`heatscope_extract`] - format adapters behind one extraction contract
//! - [`cache`] - the mtime-keyed offset cache with per-key locking
//! - [`heatmap`] - the binner producing per-metric grids
//! - [`engine`] - the request entry point tying the above together
//!
//! # Example
//!
//! ```no_run
//! use heatscope::{Config, HeatmapEngine};
//! use heatscope_extract::FileType;
//!
//! let engine = HeatmapEngine::new(Config::default());
//! let heatmaps = engine
//!     .generate_heatmap("perf.txt", FileType::Perf, None, None)
//!     .unwrap();
//! for (metric, heatmap) in &heatmaps {
//!     println!("{metric}: {} columns", heatmap.columns.len());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod heatmap;

pub use cache::OffsetCache;
pub use config::Config;
pub use engine::{HeatmapEngine, HeatmapError};
pub use heatmap::{DEFAULT_ROWS, Heatmap, YRATIO, build_heatmaps};

// Re-export the extraction crate for convenience
pub use heatscope_extract;

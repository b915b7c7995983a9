//! The heatmap generation engine.
//!
//! One engine is constructed at process start and shared across requests;
//! every request flows through the offset cache to the format adapter
//! selected by the request's file type, then through the binner.

use crate::cache::OffsetCache;
use crate::config::Config;
use crate::heatmap::{DEFAULT_ROWS, Heatmap, build_heatmaps};
use heatscope_extract::{ExtractError, FileType, InvalidFileTypeError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors surfaced to heatmap requesters. None of these are retried
/// internally; re-parsing an unchanged file cannot succeed differently.
#[derive(Error, Debug)]
pub enum HeatmapError {
    #[error(transparent)]
    InvalidFileType(#[from] InvalidFileTypeError),

    #[error("invalid row count {0}: must be at least 1")]
    InvalidRowCount(usize),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Shared engine state: configuration plus the process-wide offset cache.
#[derive(Debug, Default)]
pub struct HeatmapEngine {
    config: Config,
    cache: OffsetCache,
}

impl HeatmapEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: OffsetCache::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Generate one heatmap per metric for a trace file.
    ///
    /// `file_name` is resolved against the configured profile directory.
    /// `rows` defaults to [`DEFAULT_ROWS`]; `which` restricts extraction
    /// and binning to a single named metric (plus the implicit `samples`
    /// count). A request either produces the complete mapping or fails;
    /// there are no partial results.
    pub fn generate_heatmap(
        &self,
        file_name: &str,
        file_type: FileType,
        rows: Option<usize>,
        which: Option<&str>,
    ) -> Result<BTreeMap<String, Heatmap>, HeatmapError> {
        let rows = rows.unwrap_or(DEFAULT_ROWS);
        if rows == 0 {
            return Err(HeatmapError::InvalidRowCount(rows));
        }

        let path = self.config.resolve(file_name);
        let extraction = self.cache.fetch(&path, which, |path, mtime| {
            file_type.extract(path, which, Some(mtime))
        })?;

        log::debug!(
            "binning {} events from '{}' into {} rows",
            extraction.events.len(),
            path.display(),
            rows
        );
        Ok(build_heatmaps(
            &extraction,
            rows,
            file_type.carries_counters(),
            which,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatscope_extract::SAMPLES_METRIC;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    const PERF_TRACE: &str = "\
myapp  1234 [000] 10.100000: 1 cycles:
\t401234 main+0x54 (/usr/bin/myapp)

myapp  1234 [000] 10.900000: 1 cycles:
\t401234 main+0x54 (/usr/bin/myapp)

myapp  1234 [000] 11.500000: 1 cycles:
\t401280 foo+0x10 (/usr/bin/myapp)
";

    const PERF_TRACE_CHANGED: &str = "\
myapp  1234 [000] 20.100000: 1 cycles:
\t401234 main+0x54 (/usr/bin/myapp)
";

    fn engine_with_dir(dir: &Path) -> HeatmapEngine {
        HeatmapEngine::new(Config {
            profile_dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn generates_samples_heatmap_from_perf_trace() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("perf.txt"), PERF_TRACE).unwrap();
        let engine = engine_with_dir(dir.path());

        let heatmaps = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(10), None)
            .unwrap();

        let heatmap = &heatmaps[SAMPLES_METRIC];
        assert_eq!(heatmap.columns.len(), 2);
        assert_eq!(heatmap.rows.len(), 10);
        assert_eq!(heatmap.max_value, 1.0);
    }

    #[test]
    fn repeated_requests_yield_identical_heatmaps() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("perf.txt"), PERF_TRACE).unwrap();
        let engine = engine_with_dir(dir.path());

        let first = engine
            .generate_heatmap("perf.txt", FileType::Perf, None, None)
            .unwrap();
        let second = engine
            .generate_heatmap("perf.txt", FileType::Perf, None, None)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn row_count_varies_per_request_on_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("perf.txt"), PERF_TRACE).unwrap();
        let engine = engine_with_dir(dir.path());

        let coarse = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(10), None)
            .unwrap();
        let fine = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(100), None)
            .unwrap();

        assert_eq!(coarse[SAMPLES_METRIC].rows.len(), 10);
        assert_eq!(fine[SAMPLES_METRIC].rows.len(), 100);
    }

    #[test]
    fn modified_file_is_reparsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.txt");
        fs::write(&path, PERF_TRACE).unwrap();
        let engine = engine_with_dir(dir.path());

        let before = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(10), None)
            .unwrap();

        fs::write(&path, PERF_TRACE_CHANGED).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        let after = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(10), None)
            .unwrap();

        assert_ne!(before, after);
        assert_eq!(after[SAMPLES_METRIC].columns.len(), 1);
    }

    #[test]
    fn missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(dir.path());

        let err = engine
            .generate_heatmap("absent.txt", FileType::Perf, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            HeatmapError::Extract(ExtractError::Unreadable { .. })
        ));
    }

    #[test]
    fn zero_rows_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(dir.path());

        let err = engine
            .generate_heatmap("perf.txt", FileType::Perf, Some(0), None)
            .unwrap_err();
        assert!(matches!(err, HeatmapError::InvalidRowCount(0)));
    }

    #[test]
    fn unknown_file_type_string_maps_into_the_error_taxonomy() {
        let err: HeatmapError = "svg".parse::<FileType>().unwrap_err().into();
        assert!(matches!(err, HeatmapError::InvalidFileType(_)));
    }

    #[test]
    fn concurrent_filtered_requests_do_not_leak_metrics() {
        let counter_trace = "\
myapp  1234 [000] 10.250000: cycles: 2000 200 instructions: 4000 400 cpu-clock:
\t401234 main+0x54 (/usr/bin/myapp)
";
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("perf.txt"), counter_trace).unwrap();
        let engine = engine_with_dir(dir.path());

        std::thread::scope(|scope| {
            let cycles = scope.spawn(|| {
                engine
                    .generate_heatmap("perf.txt", FileType::Perf, Some(10), Some("cycles"))
                    .unwrap()
            });
            let instructions = scope.spawn(|| {
                engine
                    .generate_heatmap("perf.txt", FileType::Perf, Some(10), Some("instructions"))
                    .unwrap()
            });

            let cycles = cycles.join().unwrap();
            let instructions = instructions.join().unwrap();

            assert_eq!(
                cycles.keys().collect::<Vec<_>>(),
                vec!["cycles", "cycles_delta", SAMPLES_METRIC]
            );
            assert_eq!(
                instructions.keys().collect::<Vec<_>>(),
                vec!["instructions", "instructions_delta", SAMPLES_METRIC]
            );
        });
    }
}

//! The heatmap binner.
//!
//! Converts an extraction result into one dense two-dimensional grid per
//! metric: columns are whole seconds of wall-clock span, rows are
//! sub-second offsets. Cells accumulate metric weights; each grid tracks a
//! running minimum and maximum for downstream color scaling.
//!
//! The binning formulas are deliberate about flooring:
//!
//! - `col = floor(ts - floor(start))`
//! - `row = rows - floor(rows * fract(ts)) - 1`
//!
//! Row index 0 is the *largest* sub-second offset, matching the reversed
//! row boundary labels, so "later within the second" sits toward the
//! bottom of the rendered grid. These are exact IEEE semantics, not
//! nearest-rounding; changing them flips which visual edge represents the
//! start of a second.

use heatscope_extract::{ExtractionResult, SAMPLES_METRIC};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row axis scale: milliseconds per second.
pub const YRATIO: f64 = 1000.0;

/// Default number of sub-second rows.
pub const DEFAULT_ROWS: usize = 50;

/// A single metric's accumulated grid.
///
/// `values` is indexed `[column][row]`; `None` means no sample fell in the
/// cell. `min_value` and `max_value` both start at 0 and are extended to
/// bound every written cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    /// Row boundary labels in milliseconds, strictly descending.
    pub rows: Vec<f64>,
    /// Column indices, one per whole second of span.
    pub columns: Vec<usize>,
    pub values: Vec<Vec<Option<f64>>>,
    pub min_value: f64,
    pub max_value: f64,
}

impl Heatmap {
    /// Fresh all-absent grid. Allocation happens here, once per observed
    /// metric, instead of deep-copying a shared template.
    fn empty(row_offsets: &[f64], cols: usize) -> Self {
        Self {
            rows: row_offsets.to_vec(),
            columns: (0..cols).collect(),
            values: vec![vec![None; row_offsets.len()]; cols],
            min_value: 0.0,
            max_value: 0.0,
        }
    }

    fn accumulate(&mut self, col: usize, row: usize, weight: f64) {
        let cell = &mut self.values[col][row];
        let value = match *cell {
            None => weight,
            Some(previous) => previous + weight,
        };
        *cell = Some(value);
        if value < self.min_value {
            self.min_value = value;
        }
        if value > self.max_value {
            self.max_value = value;
        }
    }
}

/// Bin an extraction result into one grid per metric.
///
/// `rows` must be at least 1 (the engine validates request input).
/// `carries_counters` distinguishes counter-bearing formats (grids exist
/// only for observed metrics) from simple-count formats (a `samples` grid
/// is always present, even for an empty trace). When `which` is set,
/// weights other than the requested metric, its `_delta` companion, and
/// `samples` are ignored.
pub fn build_heatmaps(
    extraction: &ExtractionResult,
    rows: usize,
    carries_counters: bool,
    which: Option<&str>,
) -> BTreeMap<String, Heatmap> {
    debug_assert!(rows > 0, "row count must be at least 1");

    let row_offsets = row_offsets(rows);
    let cols = column_count(extraction.start, extraction.end, !extraction.events.is_empty());

    let mut heatmaps: BTreeMap<String, Heatmap> = BTreeMap::new();
    if !carries_counters {
        heatmaps.insert(
            SAMPLES_METRIC.to_string(),
            Heatmap::empty(&row_offsets, cols),
        );
    }

    let floor_start = extraction.start.floor();
    for event in &extraction.events {
        let ts = event.timestamp;
        let col = (((ts - floor_start).floor()) as usize).min(cols - 1);
        let row = rows - ((rows as f64 * ts.fract()).floor() as usize).min(rows - 1) - 1;

        for weight in &event.weights {
            if !metric_selected(&weight.metric, which) {
                continue;
            }
            heatmaps
                .entry(weight.metric.clone())
                .or_insert_with(|| Heatmap::empty(&row_offsets, cols))
                .accumulate(col, row, weight.value);
        }
    }

    heatmaps
}

/// Row boundary labels: `YRATIO * i / rows` for each row, reversed so index
/// 0 is the top of the visual grid.
fn row_offsets(rows: usize) -> Vec<f64> {
    let mut offsets: Vec<f64> = (0..rows)
        .map(|i| YRATIO * (i as f64 / rows as f64))
        .collect();
    offsets.reverse();
    offsets
}

/// One column per whole second, span rounded outward: `ceil(end) -
/// floor(start)`. A non-empty trace gets at least one column so that a
/// single sample at an integral timestamp still has a cell to land in.
fn column_count(start: f64, end: f64, has_events: bool) -> usize {
    let span = (end.ceil() - start.floor()).max(0.0) as usize;
    if has_events { span.max(1) } else { span }
}

fn metric_selected(metric: &str, which: Option<&str>) -> bool {
    match which {
        None => true,
        Some(selected) => {
            metric == SAMPLES_METRIC
                || metric == selected
                || metric.strip_suffix("_delta") == Some(selected)
        }
    }
}

//! Extract timestamped samples from V8 `.cpuprofile` JSON.
//!
//! The standalone cpuprofile format carries a call tree (`nodes`), the
//! sampled node IDs (`samples`), and microsecond deltas between consecutive
//! samples (`timeDeltas`). Sample timestamps are reconstructed as
//! `startTime` plus the cumulative deltas, converted to seconds. Samples
//! that land on the `(idle)` node are dropped.
//!
//! This format carries no named counters; every event weighs exactly one
//! `samples`.

use crate::{ExtractError, ExtractionBuilder, ExtractionResult, Result, Weight, open_trace};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

const MICROS_PER_SEC: f64 = 1_000_000.0;
const IDLE_FUNCTION: &str = "(idle)";

/// A V8 CPU profile document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpuProfile {
    #[serde(default)]
    nodes: Vec<ProfileNode>,
    /// Profile start time in microseconds.
    start_time: f64,
    /// Profile end time in microseconds.
    end_time: f64,
    /// Node IDs at the top of the stack for each sample.
    #[serde(default)]
    samples: Vec<u64>,
    /// Time deltas between samples in microseconds.
    #[serde(default)]
    time_deltas: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileNode {
    id: u64,
    call_frame: CallFrame,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallFrame {
    #[serde(default)]
    function_name: String,
}

/// Extract samples from a `.cpuprofile` file.
pub fn extract(path: &Path) -> Result<ExtractionResult> {
    let reader = open_trace(path)?;
    let result = parse(reader)?;
    log::debug!(
        "cpuprofile: {} events from '{}' in [{}, {}]",
        result.events.len(),
        path.display(),
        result.start,
        result.end
    );
    Ok(result)
}

/// Parse a cpuprofile document from a reader.
pub fn parse<R: BufRead>(reader: R) -> Result<ExtractionResult> {
    let profile: CpuProfile = serde_json::from_reader(reader)?;

    if profile.nodes.is_empty() {
        return Err(ExtractError::Malformed {
            format: "cpuprofile",
            message: "profile has no nodes".to_string(),
        });
    }
    if profile.samples.len() != profile.time_deltas.len() {
        log::warn!(
            "cpuprofile: {} samples but {} time deltas, extra entries ignored",
            profile.samples.len(),
            profile.time_deltas.len()
        );
    }

    let idle_nodes: HashSet<u64> = profile
        .nodes
        .iter()
        .filter(|node| node.call_frame.function_name == IDLE_FUNCTION)
        .map(|node| node.id)
        .collect();

    let mut builder = ExtractionBuilder::new();
    builder.expand_range(
        profile.start_time / MICROS_PER_SEC,
        profile.end_time / MICROS_PER_SEC,
    );

    let mut ts = profile.start_time;
    for (node_id, delta) in profile.samples.iter().zip(&profile.time_deltas) {
        ts += delta;
        if idle_nodes.contains(node_id) {
            continue;
        }
        builder.push(ts / MICROS_PER_SEC, vec![Weight::samples()]);
    }

    Ok(builder.finish())
}

//! Extract timestamped samples from Netflix profile documents.
//!
//! An nflxprofile carries its sampled stacks as a node dictionary plus the
//! sampled node IDs and second-resolution deltas between consecutive
//! samples. Timestamps are reconstructed as `startTime` plus the cumulative
//! deltas; samples landing on an `(idle)` node are dropped. The format
//! carries no named counters.

use crate::{ExtractError, ExtractionBuilder, ExtractionResult, Result, Weight, open_trace};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

const IDLE_FUNCTION: &str = "(idle)";

/// A Netflix profile document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NflxProfile {
    /// Profile start time in seconds.
    start_time: f64,
    /// Profile end time in seconds.
    end_time: f64,
    /// Node IDs sampled, in order.
    #[serde(default)]
    samples: Vec<u64>,
    /// Time deltas between samples in seconds.
    #[serde(default)]
    time_deltas: Vec<f64>,
    /// Stack frame dictionary keyed by node ID.
    #[serde(default)]
    nodes: HashMap<String, NflxNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NflxNode {
    #[serde(default)]
    function_name: String,
}

/// Extract samples from an nflxprofile file.
pub fn extract(path: &Path) -> Result<ExtractionResult> {
    let reader = open_trace(path)?;
    let result = parse(reader)?;
    log::debug!(
        "nflxprofile: {} events from '{}' in [{}, {}]",
        result.events.len(),
        path.display(),
        result.start,
        result.end
    );
    Ok(result)
}

/// Parse an nflxprofile document from a reader.
pub fn parse<R: BufRead>(reader: R) -> Result<ExtractionResult> {
    let profile: NflxProfile = serde_json::from_reader(reader)?;

    if profile.samples.len() != profile.time_deltas.len() {
        return Err(ExtractError::Malformed {
            format: "nflxprofile",
            message: format!(
                "{} samples but {} time deltas",
                profile.samples.len(),
                profile.time_deltas.len()
            ),
        });
    }

    let idle_nodes: HashSet<u64> = profile
        .nodes
        .iter()
        .filter(|(_, node)| node.function_name == IDLE_FUNCTION)
        .filter_map(|(id, _)| id.parse().ok())
        .collect();

    let mut builder = ExtractionBuilder::new();
    builder.expand_range(profile.start_time, profile.end_time);

    let mut ts = profile.start_time;
    for (node_id, delta) in profile.samples.iter().zip(&profile.time_deltas) {
        ts += delta;
        if idle_nodes.contains(node_id) {
            continue;
        }
        builder.push(ts, vec![Weight::samples()]);
    }

    Ok(builder.finish())
}

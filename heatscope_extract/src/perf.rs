//! Extract timestamped samples from Linux `perf script` output.
//!
//! Each record is a header line establishing a timestamp and optional
//! counter readings, followed by zero or more indented stack-frame lines.
//! The parser streams the input line by line and never retains stack text
//! beyond the current record, since traces can be many gigabytes.
//!
//! A record whose stack consists of idle-loop frames is dropped entirely.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use heatscope_extract::perf;
//!
//! let result = perf::extract(Path::new("profiles/perf.txt"), None).unwrap();
//! for event in &result.events {
//!     println!("{}: {} weights", event.timestamp, event.weights.len());
//! }
//! ```

use crate::{ExtractError, ExtractionBuilder, ExtractionResult, Result, Weight, open_trace};
use std::io::{BufRead, ErrorKind};
use std::path::Path;

/// Stack frames that mark a sample as idle.
const IDLE_SYMBOLS: &[&str] = &[
    "native_safe_halt",
    "acpi_idle_do_entry",
    "cpu_idle_poll",
    "mwait_idle",
    "acpi_processor_ffh_cstate_enter",
    "cpu_startup_entry",
];

/// A record header in flight: timestamp and weights are fixed by the header
/// line, stack text accumulates until the next header decides its fate.
struct PendingRecord {
    timestamp: f64,
    weights: Vec<Weight>,
    stack: String,
}

/// Extract samples from a `perf script` output file.
///
/// When `which` names a metric, only that counter (plus the implicit
/// `samples` weight) is scanned out of each header line.
pub fn extract(path: &Path, which: Option<&str>) -> Result<ExtractionResult> {
    let reader = open_trace(path)?;
    let result = parse(reader, which)?;
    log::debug!(
        "perf: {} events from '{}' in [{}, {}]",
        result.events.len(),
        path.display(),
        result.start,
        result.end
    );
    Ok(result)
}

/// Parse `perf script` output from a reader.
pub fn parse<R: BufRead>(mut reader: R, which: Option<&str>) -> Result<ExtractionResult> {
    let mut builder = ExtractionBuilder::new();
    let mut pending: Option<PendingRecord> = None;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                return Err(ExtractError::Malformed {
                    format: "perf",
                    message: "input is not valid UTF-8".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        let content = line.trim_end();
        if content.starts_with('#') {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            if let Some((timestamp, weights)) = parse_event_header(content, which) {
                flush(pending.take(), &mut builder);
                pending = Some(PendingRecord {
                    timestamp,
                    weights,
                    stack: String::new(),
                });
                continue;
            }
        }

        // Stack frame, or a line that matched nothing: fold it into the
        // current record's stack text and keep going.
        if let Some(record) = pending.as_mut() {
            record.stack.push_str(content.trim());
            record.stack.push('\n');
        }
    }
    flush(pending, &mut builder);

    Ok(builder.finish())
}

/// Finalize a record, dropping it if its stack matches the idle predicate.
fn flush(pending: Option<PendingRecord>, builder: &mut ExtractionBuilder) {
    if let Some(record) = pending {
        if !is_idle_stack(&record.stack) {
            builder.push(record.timestamp, record.weights);
        }
    }
}

fn is_idle_stack(stack: &str) -> bool {
    IDLE_SYMBOLS.iter().any(|symbol| stack.contains(symbol))
}

/// Parse a record header line into its timestamp and metric weights.
///
/// Header shape: `comm pid [cpu] <ts>: [<name>: <value> <delta>]... [period] event:`
/// Returns `None` when the line carries no timestamp token, in which case the
/// caller treats it as stack content.
fn parse_event_header(line: &str, which: Option<&str>) -> Option<(f64, Vec<Weight>)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let ts_index = tokens.iter().position(|t| is_timestamp_token(t))?;
    let timestamp: f64 = tokens[ts_index].trim_end_matches(':').parse().ok()?;

    let mut weights = vec![Weight::samples()];
    match which {
        Some(crate::SAMPLES_METRIC) => {}
        Some(metric) => {
            if let Some((value, delta)) = find_counter(&tokens[ts_index + 1..], metric) {
                weights.push(Weight::new(format!("{metric}_delta"), delta));
                weights.push(Weight::new(metric, value));
            }
        }
        None => {
            for (name, value, delta) in scan_counters(&tokens[ts_index + 1..]) {
                weights.push(Weight::new(format!("{name}_delta"), delta));
                weights.push(Weight::new(name, value));
            }
        }
    }

    Some((timestamp, weights))
}

/// A timestamp token is a dotted decimal immediately followed by a colon,
/// e.g. `12345.678901:`.
fn is_timestamp_token(token: &str) -> bool {
    let Some(number) = token.strip_suffix(':') else {
        return false;
    };
    number.contains('.')
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.parse::<f64>().is_ok()
}

/// Scan `name: value delta` counter triples from the tokens after the
/// timestamp. The trailing `event:` token never matches since no two
/// integers follow it.
fn scan_counters<'a>(tokens: &[&'a str]) -> Vec<(&'a str, f64, f64)> {
    let mut counters = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match counter_at(tokens, i) {
            Some(triple) => {
                counters.push(triple);
                i += 3;
            }
            None => i += 1,
        }
    }
    counters
}

/// Find the counter named `metric` among the header tokens.
fn find_counter(tokens: &[&str], metric: &str) -> Option<(f64, f64)> {
    let mut i = 0;
    while i < tokens.len() {
        match counter_at(tokens, i) {
            Some((name, value, delta)) => {
                if name == metric {
                    return Some((value, delta));
                }
                i += 3;
            }
            None => i += 1,
        }
    }
    None
}

fn counter_at<'a>(tokens: &[&'a str], i: usize) -> Option<(&'a str, f64, f64)> {
    let name = tokens[i].strip_suffix(':')?;
    if name.is_empty() {
        return None;
    }
    let value: u64 = tokens.get(i + 1)?.parse().ok()?;
    let delta: u64 = tokens.get(i + 2)?.parse().ok()?;
    Some((name, value as f64, delta as f64))
}

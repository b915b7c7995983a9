//! Extract timestamped samples from Chrome Trace Event JSON.
//!
//! Accepts both the object form (`{"traceEvents": [...]}`) and the bare
//! event array that some tools emit. Metadata events (phase `M`) and events
//! without a timestamp are skipped; remaining events contribute one sample
//! at their microsecond timestamp converted to seconds.
//!
//! Trace event timestamps already embed absolute-time semantics, so the
//! caller's cache layer passes its observed modification time down as a
//! hint; this adapter has no format-specific cache of its own and only
//! records the hint.

use crate::{ExtractError, ExtractionBuilder, ExtractionResult, Result, Weight, open_trace};
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use std::time::SystemTime;

const MICROS_PER_SEC: f64 = 1_000_000.0;
const METADATA_PHASE: &str = "M";

/// A trace document: either a wrapper object or a bare event array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TraceDocument {
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<RawEvent>,
    },
    Array(Vec<RawEvent>),
}

#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    /// Event phase, e.g. `X`, `B`, `E`, `I`, or `M` for metadata.
    #[serde(default)]
    ph: String,
    /// Timestamp in microseconds.
    #[serde(default)]
    ts: f64,
}

/// Extract samples from a Chrome Trace Event file.
pub fn extract(path: &Path, known_mtime: Option<SystemTime>) -> Result<ExtractionResult> {
    if let Some(mtime) = known_mtime {
        log::debug!("trace_event: extracting '{}' (mtime {:?})", path.display(), mtime);
    }
    let reader = open_trace(path)?;
    let result = parse(reader)?;
    log::debug!(
        "trace_event: {} events from '{}' in [{}, {}]",
        result.events.len(),
        path.display(),
        result.start,
        result.end
    );
    Ok(result)
}

/// Parse a trace event document from a reader.
pub fn parse<R: BufRead>(reader: R) -> Result<ExtractionResult> {
    let document: TraceDocument = serde_json::from_reader(reader)?;
    let events = match document {
        TraceDocument::Object { trace_events } => trace_events,
        TraceDocument::Array(events) => events,
    };

    if events.is_empty() {
        return Err(ExtractError::Malformed {
            format: "trace_event",
            message: "trace has no events".to_string(),
        });
    }

    let mut builder = ExtractionBuilder::new();
    for event in &events {
        if event.ph == METADATA_PHASE || event.ts <= 0.0 {
            continue;
        }
        builder.push(event.ts / MICROS_PER_SEC, vec![Weight::samples()]);
    }

    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const OBJECT_TRACE: &str = r#"{
        "traceEvents": [
            {"name": "process_name", "ph": "M", "pid": 1, "ts": 0},
            {"name": "frame", "ph": "X", "pid": 1, "tid": 1, "ts": 1100000, "dur": 5},
            {"name": "tick", "ph": "I", "pid": 1, "tid": 1, "ts": 1600000},
            {"name": "frame", "ph": "X", "pid": 1, "tid": 1, "ts": 2400000, "dur": 7}
        ]
    }"#;

    #[test]
    fn parses_object_form() {
        let result = parse(Cursor::new(OBJECT_TRACE)).unwrap();

        assert_eq!(result.events.len(), 3);
        assert_eq!(result.start, 1.1);
        assert_eq!(result.end, 2.4);
    }

    #[test]
    fn parses_bare_array_form() {
        let input = r#"[
            {"name": "a", "ph": "B", "ts": 500000},
            {"name": "a", "ph": "E", "ts": 900000}
        ]"#;
        let result = parse(Cursor::new(input)).unwrap();

        assert_eq!(result.events.len(), 2);
        assert_eq!(result.start, 0.5);
        assert_eq!(result.end, 0.9);
    }

    #[test]
    fn metadata_and_unstamped_events_are_skipped() {
        let result = parse(Cursor::new(OBJECT_TRACE)).unwrap();
        for event in &result.events {
            assert!(event.timestamp > 0.0);
        }
    }

    #[test]
    fn events_weigh_one_sample_each() {
        let result = parse(Cursor::new(OBJECT_TRACE)).unwrap();
        for event in &result.events {
            assert_eq!(event.weights, vec![Weight::samples()]);
        }
    }

    #[test]
    fn empty_trace_is_malformed() {
        let err = parse(Cursor::new(r#"{"traceEvents": []}"#)).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::Malformed {
                format: "trace_event",
                ..
            }
        ));
    }

    #[test]
    fn invalid_json_is_a_json_error() {
        let err = parse(Cursor::new("[{]")).unwrap_err();
        assert!(matches!(err, ExtractError::Json(_)));
    }
}

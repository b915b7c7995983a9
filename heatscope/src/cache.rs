//! Modification-time keyed cache of extraction results.
//!
//! The cache guarantees at most one fresh parse per unchanged file: a
//! lookup reads the file's current mtime, returns the stored result when it
//! matches the stored mtime, and otherwise re-extracts and overwrites the
//! entry. Entries are never evicted; the working set is a small,
//! operator-curated collection of trace files.
//!
//! The check-mtime/use-or-recompute sequence is a critical section per
//! cache key, not a single global lock, so concurrent requests for
//! unrelated files never serialize against each other while concurrent
//! requests for the same stale file trigger exactly one re-parse.

use heatscope_extract::{ExtractError, ExtractionResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Cache key: the trace path plus the metric filter it was extracted with.
/// A result extracted under a filter lacks the other metrics, so filtered
/// and unfiltered extractions of the same file are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    which: Option<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    mtime: SystemTime,
    result: Arc<ExtractionResult>,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Process-wide store of extraction results, keyed by file path and metric
/// filter, invalidated by file modification time.
#[derive(Debug, Default)]
pub struct OffsetCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl OffsetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `path` if the file's modification time
    /// still matches, otherwise invoke `reload` and store its output.
    ///
    /// `reload` receives the path and the freshly observed mtime. It runs
    /// inside the key's critical section: a second caller for the same key
    /// blocks until the first parse completes and then sees its result.
    pub fn fetch<F>(
        &self,
        path: &Path,
        which: Option<&str>,
        reload: F,
    ) -> Result<Arc<ExtractionResult>, ExtractError>
    where
        F: FnOnce(&Path, SystemTime) -> Result<ExtractionResult, ExtractError>,
    {
        let mtime = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|source| ExtractError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let slot = self.slot(path, which);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = entry.as_ref() {
            if cached.mtime == mtime {
                log::debug!("offset cache hit for '{}'", path.display());
                return Ok(Arc::clone(&cached.result));
            }
            log::debug!("offset cache stale for '{}', re-extracting", path.display());
        } else {
            log::debug!("offset cache miss for '{}'", path.display());
        }

        let result = Arc::new(reload(path, mtime)?);
        *entry = Some(CacheEntry {
            mtime,
            result: Arc::clone(&result),
        });
        Ok(result)
    }

    /// Peek at the stored entry for a key, regardless of the file's current
    /// modification time.
    pub fn get(
        &self,
        path: &Path,
        which: Option<&str>,
    ) -> Option<(SystemTime, Arc<ExtractionResult>)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(&CacheKey {
            path: path.to_path_buf(),
            which: which.map(str::to_string),
        })?;
        let entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .map(|cached| (cached.mtime, Arc::clone(&cached.result)))
    }

    /// Store a result for a key, superseding any previous entry.
    pub fn put(
        &self,
        path: &Path,
        which: Option<&str>,
        mtime: SystemTime,
        result: ExtractionResult,
    ) {
        let slot = self.slot(path, which);
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = Some(CacheEntry {
            mtime,
            result: Arc::new(result),
        });
    }

    /// Number of distinct keys ever stored or in flight.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch or create the per-key slot. The outer map lock is held only
    /// long enough to clone the slot handle.
    fn slot(&self, path: &Path, which: Option<&str>) -> Slot {
        let key = CacheKey {
            path: path.to_path_buf(),
            which: which.map(str::to_string),
        };
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatscope_extract::{ExtractionBuilder, Weight};
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn canned_result(ts: f64) -> ExtractionResult {
        let mut builder = ExtractionBuilder::new();
        builder.push(ts, vec![Weight::samples()]);
        builder.finish()
    }

    fn bump_mtime(path: &Path, seconds_ahead: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(seconds_ahead))
            .unwrap();
    }

    #[test]
    fn second_fetch_of_unchanged_file_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "data").unwrap();

        let cache = OffsetCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .fetch(&path, None, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(canned_result(1.5))
            })
            .unwrap();
        let second = cache
            .fetch(&path, None, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(canned_result(9.5))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.events[0].timestamp, 1.5);
    }

    #[test]
    fn mtime_change_forces_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "data").unwrap();

        let cache = OffsetCache::new();
        let calls = AtomicUsize::new(0);

        let first = cache
            .fetch(&path, None, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(canned_result(1.5))
            })
            .unwrap();
        bump_mtime(&path, 10);
        let second = cache
            .fetch(&path, None, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(canned_result(9.5))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.events[0].timestamp, 1.5);
        assert_eq!(second.events[0].timestamp, 9.5);
    }

    #[test]
    fn missing_file_is_unreadable() {
        let cache = OffsetCache::new();
        let err = cache
            .fetch(Path::new("/nonexistent/trace.txt"), None, |_, _| {
                Ok(canned_result(0.5))
            })
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable { .. }));
    }

    #[test]
    fn reload_failure_leaves_no_fresh_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "data").unwrap();

        let cache = OffsetCache::new();
        let err = cache
            .fetch(&path, None, |_, _| {
                Err(ExtractError::Malformed {
                    format: "perf",
                    message: "broken".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
        assert!(cache.get(&path, None).is_none());

        // A later fetch parses again and succeeds.
        let result = cache.fetch(&path, None, |_, _| Ok(canned_result(2.5))).unwrap();
        assert_eq!(result.events[0].timestamp, 2.5);
    }

    #[test]
    fn filtered_and_unfiltered_extractions_are_distinct_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "data").unwrap();

        let cache = OffsetCache::new();
        cache
            .fetch(&path, None, |_, _| Ok(canned_result(1.5)))
            .unwrap();
        let filtered = cache
            .fetch(&path, Some("cycles"), |_, _| Ok(canned_result(7.5)))
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(filtered.events[0].timestamp, 7.5);
    }

    #[test]
    fn concurrent_cold_fetches_parse_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        fs::write(&path, "data").unwrap();

        let cache = OffsetCache::new();
        let calls = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let result = cache
                        .fetch(&path, None, |_, _| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(canned_result(3.5))
                        })
                        .unwrap();
                    assert_eq!(result.events[0].timestamp, 3.5);
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = OffsetCache::new();
        let path = Path::new("trace.txt");
        let mtime = SystemTime::UNIX_EPOCH;

        cache.put(path, None, mtime, canned_result(4.5));
        let (stored_mtime, result) = cache.get(path, None).unwrap();

        assert_eq!(stored_mtime, mtime);
        assert_eq!(result.events[0].timestamp, 4.5);
    }
}

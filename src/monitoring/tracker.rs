use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// A single tracked operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub metadata: HashMap<String, String>,
}

/// Handle returned by [`OperationTracker::begin`].
///
/// Pass it back to `end` from any thread; ending the same handle twice is
/// ignored.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: String,
    name: String,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Duration statistics for one operation name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub count: usize,
    pub avg_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub median_secs: f64,
    pub last_secs: f64,
    /// Present once at least five durations were recorded
    pub p95_secs: Option<f64>,
    pub p99_secs: Option<f64>,
}

struct ActiveOperation {
    record: OperationRecord,
    started: Instant,
}

struct TrackerState {
    active: HashMap<String, ActiveOperation>,
    completed: VecDeque<OperationRecord>,
    /// Recent durations per operation name, feeding `performance_summary`
    history: HashMap<String, VecDeque<f64>>,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    completed_cap: usize,
    history_cap: usize,
}

/// Scoped measurement of named operations. Clones share one tracker.
///
/// Operations move from the active set to a bounded completed history when
/// ended. Known limitation: an operation whose `end` is never called stays
/// in the active set forever; leaked operations are surfaced, not healed.
#[derive(Clone)]
pub struct OperationTracker {
    inner: Arc<TrackerInner>,
}

impl OperationTracker {
    pub fn new(completed_cap: usize, history_cap: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState {
                    active: HashMap::new(),
                    completed: VecDeque::new(),
                    history: HashMap::new(),
                }),
                completed_cap,
                history_cap,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a named operation.
    pub fn begin(&self, name: &str, metadata: HashMap<String, String>) -> OperationHandle {
        let id = Uuid::new_v4().to_string();
        let record = OperationRecord {
            operation_id: id.clone(),
            operation_name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_secs: None,
            metadata,
        };

        let mut state = self.lock_state();
        state.active.insert(
            id.clone(),
            ActiveOperation {
                record,
                started: Instant::now(),
            },
        );
        debug!("operation started: {} ({})", name, id);

        OperationHandle {
            id,
            name: name.to_string(),
        }
    }

    /// Finish a tracked operation.
    ///
    /// Merges `extra` into the record's metadata, adds an `error` entry when
    /// `error` is given, and moves the record into the completed history.
    /// A handle that was already ended is ignored.
    pub fn end(
        &self,
        handle: &OperationHandle,
        extra: HashMap<String, String>,
        error: Option<&str>,
    ) {
        let mut state = self.lock_state();

        let Some(active) = state.active.remove(&handle.id) else {
            debug!("operation {} already ended, ignoring", handle.id);
            return;
        };

        let duration = active.started.elapsed().as_secs_f64();
        let mut record = active.record;
        record.end_time = Some(Utc::now());
        record.duration_secs = Some(duration);
        record.metadata.extend(extra);
        if let Some(error) = error {
            record.metadata.insert("error".to_string(), error.to_string());
        }

        let history_cap = self.inner.history_cap;
        let history = state
            .history
            .entry(record.operation_name.clone())
            .or_default();
        history.push_back(duration);
        while history.len() > history_cap {
            history.pop_front();
        }

        info!(
            "operation finished: {} in {:.3}s",
            record.operation_name, duration
        );

        state.completed.push_back(record);
        while state.completed.len() > self.inner.completed_cap {
            state.completed.pop_front();
        }
    }

    /// Start a scoped operation whose end bookkeeping is guaranteed.
    ///
    /// The returned guard ends the operation on drop, on every exit path
    /// including panics; call [`OperationGuard::finish`] to attach extra
    /// metadata or an error first.
    pub fn track(&self, name: &str, metadata: HashMap<String, String>) -> OperationGuard {
        let handle = self.begin(name, metadata);
        OperationGuard {
            tracker: self.clone(),
            handle: Some(handle),
        }
    }

    /// Consistent copies of the active set and completed history.
    pub fn snapshot(&self) -> (Vec<OperationRecord>, Vec<OperationRecord>) {
        let state = self.lock_state();
        let active = state.active.values().map(|a| a.record.clone()).collect();
        let completed = state.completed.iter().cloned().collect();
        (active, completed)
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active.len()
    }

    /// Duration statistics per operation name over the retained history.
    pub fn performance_summary(&self) -> HashMap<String, OperationSummary> {
        let state = self.lock_state();
        let mut summary = HashMap::new();

        for (name, durations) in &state.history {
            if durations.is_empty() {
                continue;
            }
            let mut sorted: Vec<f64> = durations.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let count = sorted.len();
            let avg = sorted.iter().sum::<f64>() / count as f64;
            let median = sorted[count / 2];
            let (p95, p99) = if count >= 5 {
                (
                    Some(sorted[(0.95 * count as f64) as usize]),
                    Some(sorted[(0.99 * count as f64) as usize]),
                )
            } else {
                (None, None)
            };

            summary.insert(
                name.clone(),
                OperationSummary {
                    count,
                    avg_secs: avg,
                    min_secs: sorted[0],
                    max_secs: sorted[count - 1],
                    median_secs: median,
                    last_secs: *durations.back().unwrap_or(&0.0),
                    p95_secs: p95,
                    p99_secs: p99,
                },
            );
        }

        summary
    }

    /// Clear the completed history and per-name duration history.
    ///
    /// In-flight operations are kept; their records still land in the
    /// history when they end.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.completed.clear();
        state.history.clear();
    }
}

/// RAII guard for a scoped operation.
pub struct OperationGuard {
    tracker: OperationTracker,
    handle: Option<OperationHandle>,
}

impl OperationGuard {
    pub fn handle(&self) -> Option<&OperationHandle> {
        self.handle.as_ref()
    }

    /// End the operation now, attaching extra metadata and an optional error.
    pub fn finish(mut self, extra: HashMap<String, String>, error: Option<&str>) {
        if let Some(handle) = self.handle.take() {
            self.tracker.end(&handle, extra, error);
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let error = if std::thread::panicking() {
                Some("operation scope panicked")
            } else {
                None
            };
            self.tracker.end(&handle, HashMap::new(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_end_moves_record_to_history() {
        let tracker = OperationTracker::new(100, 50);
        let handle = tracker.begin("pdf_extraction", HashMap::new());
        assert_eq!(tracker.active_count(), 1);

        tracker.end(&handle, HashMap::new(), None);
        assert_eq!(tracker.active_count(), 0);

        let (active, completed) = tracker.snapshot();
        assert!(active.is_empty());
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].operation_name, "pdf_extraction");
        assert!(completed[0].duration_secs.is_some());
        assert!(completed[0].end_time.is_some());
    }

    #[test]
    fn double_end_is_ignored() {
        let tracker = OperationTracker::new(100, 50);
        let handle = tracker.begin("chunking", HashMap::new());

        tracker.end(&handle, HashMap::new(), None);
        tracker.end(&handle, HashMap::new(), None);

        assert_eq!(tracker.active_count(), 0);
        let (_, completed) = tracker.snapshot();
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn end_with_error_adds_metadata_entry() {
        let tracker = OperationTracker::new(100, 50);
        let handle = tracker.begin("llm_generation", HashMap::new());
        tracker.end(&handle, HashMap::new(), Some("provider timeout"));

        let (_, completed) = tracker.snapshot();
        assert_eq!(
            completed[0].metadata.get("error").map(String::as_str),
            Some("provider timeout")
        );
    }

    #[test]
    fn guard_ends_on_drop() {
        let tracker = OperationTracker::new(100, 50);
        {
            let _guard = tracker.track("scoped", HashMap::new());
            assert_eq!(tracker.active_count(), 1);
        }
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn guard_finish_attaches_extra_metadata() {
        let tracker = OperationTracker::new(100, 50);
        let guard = tracker.track(
            "qa_answer",
            HashMap::from([("file".to_string(), "report.pdf".to_string())]),
        );
        guard.finish(
            HashMap::from([("pages".to_string(), "12".to_string())]),
            None,
        );

        let (_, completed) = tracker.snapshot();
        assert_eq!(completed.len(), 1);
        let metadata = &completed[0].metadata;
        assert_eq!(metadata.get("file").map(String::as_str), Some("report.pdf"));
        assert_eq!(metadata.get("pages").map(String::as_str), Some("12"));
    }

    #[test]
    fn guard_records_panicking_scope() {
        let tracker = OperationTracker::new(100, 50);
        let inner = tracker.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.track("explodes", HashMap::new());
            panic!("boom");
        }));
        assert!(result.is_err());

        assert_eq!(tracker.active_count(), 0);
        let (_, completed) = tracker.snapshot();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].metadata.contains_key("error"));
    }

    #[test]
    fn completed_history_is_bounded() {
        let tracker = OperationTracker::new(5, 50);
        for i in 0..8 {
            let handle = tracker.begin(&format!("op_{}", i), HashMap::new());
            tracker.end(&handle, HashMap::new(), None);
        }

        let (_, completed) = tracker.snapshot();
        assert_eq!(completed.len(), 5);
        // Oldest entries were evicted
        assert_eq!(completed[0].operation_name, "op_3");
    }

    #[test]
    fn performance_summary_reports_statistics() {
        let tracker = OperationTracker::new(100, 50);
        for _ in 0..6 {
            let handle = tracker.begin("summarize", HashMap::new());
            tracker.end(&handle, HashMap::new(), None);
        }

        let summary = tracker.performance_summary();
        let stats = summary.get("summarize").expect("missing summary");
        assert_eq!(stats.count, 6);
        assert!(stats.min_secs <= stats.median_secs);
        assert!(stats.median_secs <= stats.max_secs);
        assert!(stats.p95_secs.is_some());
        assert!(stats.p99_secs.is_some());
    }

    #[test]
    fn end_from_another_thread() {
        let tracker = OperationTracker::new(100, 50);
        let handle = tracker.begin("cross_thread", HashMap::new());
        let worker = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                tracker.end(&handle, HashMap::new(), None);
            })
        };
        worker.join().expect("worker panicked");
        assert_eq!(tracker.active_count(), 0);
    }
}

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Activity-derived classification of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unknown,
    Active,
    Inactive,
}

/// Rolling statistics for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Latencies of the most recent successful requests (seconds)
    pub rolling_latencies: VecDeque<f64>,
    /// Arithmetic mean over `rolling_latencies`
    pub avg_latency_secs: f64,
    pub last_activity: DateTime<Utc>,
    pub status: ModelStatus,
}

impl ModelState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rolling_latencies: VecDeque::new(),
            avg_latency_secs: 0.0,
            last_activity: Utc::now(),
            status: ModelStatus::Unknown,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Derived per-model health view for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub status: ModelStatus,
    pub total_requests: u64,
    pub success_rate: f64,
    pub avg_latency_secs: f64,
    pub last_activity: DateTime<Utc>,
    pub is_healthy: bool,
}

/// Per-model rolling statistics, created lazily on first request.
///
/// Latency averages use only the most recent window of successful requests
/// so old spikes age out and the average reflects current health.
pub struct ModelHealthRegistry {
    models: DashMap<String, ModelState>,
    latency_window: usize,
    /// Average latency below which a model still counts as healthy
    healthy_latency_secs: f64,
}

impl ModelHealthRegistry {
    pub fn new(latency_window: usize, healthy_latency_secs: f64) -> Self {
        Self {
            models: DashMap::new(),
            latency_window,
            healthy_latency_secs,
        }
    }

    /// Record one request against a model.
    ///
    /// Latency is only added to the rolling buffer for successful requests;
    /// `last_activity` is updated either way.
    pub fn record_request(&self, model: &str, success: bool, latency_secs: f64) {
        let mut state = self
            .models
            .entry(model.to_string())
            .or_insert_with(|| ModelState::new(model));

        state.total_requests += 1;
        state.last_activity = Utc::now();

        if success {
            state.successful_requests += 1;
            state.rolling_latencies.push_back(latency_secs);
            while state.rolling_latencies.len() > self.latency_window {
                state.rolling_latencies.pop_front();
            }
            state.avg_latency_secs = state.rolling_latencies.iter().sum::<f64>()
                / state.rolling_latencies.len() as f64;
        } else {
            state.failed_requests += 1;
        }
    }

    /// Reclassify every model by activity recency.
    ///
    /// This is the only status transition; there is no manual activation.
    pub fn evaluate_health(&self, now: DateTime<Utc>, inactivity_window: Duration) {
        let window = ChronoDuration::from_std(inactivity_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        for mut state in self.models.iter_mut() {
            state.status = if now - state.last_activity > window {
                ModelStatus::Inactive
            } else {
                ModelStatus::Active
            };
        }
    }

    /// Snapshot of one model's state.
    pub fn status(&self, model: &str) -> Option<ModelState> {
        self.models.get(model).map(|state| state.clone())
    }

    /// Derived health report for one model.
    pub fn report(&self, model: &str) -> Option<ModelReport> {
        self.models.get(model).map(|state| ModelReport {
            status: state.status,
            total_requests: state.total_requests,
            success_rate: state.success_rate(),
            avg_latency_secs: state.avg_latency_secs,
            last_activity: state.last_activity,
            is_healthy: state.success_rate() > 0.9
                && state.avg_latency_secs < self.healthy_latency_secs,
        })
    }

    /// Copies of all model states.
    pub fn all_statuses(&self) -> HashMap<String, ModelState> {
        self.models
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of models currently classified active.
    pub fn active_count(&self) -> usize {
        self.models
            .iter()
            .filter(|entry| entry.status == ModelStatus::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&self) {
        self.models.clear();
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, model: &str, at: DateTime<Utc>) {
        if let Some(mut state) = self.models.get_mut(model) {
            state.last_activity = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> ModelHealthRegistry {
        ModelHealthRegistry::new(50, 30.0)
    }

    #[test]
    fn state_is_created_lazily() {
        let registry = registry();
        assert!(registry.status("phi-3-mini").is_none());

        registry.record_request("phi-3-mini", true, 1.5);
        let state = registry.status("phi-3-mini").expect("state missing");
        assert_eq!(state.total_requests, 1);
        assert_eq!(state.status, ModelStatus::Unknown);
    }

    #[test]
    fn counters_and_average_follow_requests() {
        let registry = registry();
        for _ in 0..5 {
            registry.record_request("m1", true, 2.0);
        }
        registry.record_request("m1", false, 1.0);

        let state = registry.status("m1").expect("state missing");
        assert_eq!(state.total_requests, 6);
        assert_eq!(state.successful_requests, 5);
        assert_eq!(state.failed_requests, 1);
        assert_eq!(state.avg_latency_secs, 2.0);
    }

    #[test]
    fn rolling_buffer_keeps_only_last_window() {
        let registry = ModelHealthRegistry::new(50, 30.0);
        for i in 0..55 {
            registry.record_request("m1", true, i as f64);
        }

        let state = registry.status("m1").expect("state missing");
        assert_eq!(state.rolling_latencies.len(), 50);
        // Mean of 5..=54
        let expected = (5..55).sum::<i64>() as f64 / 50.0;
        assert!((state.avg_latency_secs - expected).abs() < 1e-9);
    }

    #[test]
    fn failed_requests_do_not_touch_latencies() {
        let registry = registry();
        registry.record_request("m1", true, 4.0);
        registry.record_request("m1", false, 99.0);

        let state = registry.status("m1").expect("state missing");
        assert_eq!(state.rolling_latencies.len(), 1);
        assert_eq!(state.avg_latency_secs, 4.0);
    }

    #[test]
    fn inactive_after_quiet_window() {
        let registry = registry();
        registry.record_request("m1", true, 1.0);
        registry.set_last_activity("m1", Utc::now() - ChronoDuration::minutes(10));

        registry.evaluate_health(Utc::now(), Duration::from_secs(300));
        let state = registry.status("m1").expect("state missing");
        assert_eq!(state.status, ModelStatus::Inactive);
    }

    #[test]
    fn recent_activity_marks_active() {
        let registry = registry();
        registry.record_request("m1", true, 1.0);

        registry.evaluate_health(Utc::now(), Duration::from_secs(300));
        let state = registry.status("m1").expect("state missing");
        assert_eq!(state.status, ModelStatus::Active);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn report_flags_unhealthy_models() {
        let registry = ModelHealthRegistry::new(50, 30.0);
        for _ in 0..9 {
            registry.record_request("slow", true, 45.0);
        }
        let report = registry.report("slow").expect("report missing");
        assert!(!report.is_healthy);

        for _ in 0..9 {
            registry.record_request("fast", true, 0.5);
        }
        let report = registry.report("fast").expect("report missing");
        assert!(report.is_healthy);
    }

    #[test]
    fn clear_removes_all_state() {
        let registry = registry();
        registry.record_request("m1", true, 1.0);
        registry.clear();
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn totals_always_add_up(requests in prop::collection::vec((any::<bool>(), 0.0f64..120.0), 0..200)) {
            let registry = ModelHealthRegistry::new(50, 30.0);
            for (success, latency) in &requests {
                registry.record_request("m1", *success, *latency);
                let state = registry.status("m1").expect("state missing");
                prop_assert_eq!(
                    state.total_requests,
                    state.successful_requests + state.failed_requests
                );
            }
        }

        #[test]
        fn latency_buffer_never_exceeds_window(latencies in prop::collection::vec(0.0f64..60.0, 0..120)) {
            let registry = ModelHealthRegistry::new(50, 30.0);
            for latency in &latencies {
                registry.record_request("m1", true, *latency);
            }
            if let Some(state) = registry.status("m1") {
                prop_assert!(state.rolling_latencies.len() <= 50);
                let window: Vec<f64> = latencies.iter().rev().take(50).rev().copied().collect();
                if !window.is_empty() {
                    let expected = window.iter().sum::<f64>() / window.len() as f64;
                    prop_assert!((state.avg_latency_secs - expected).abs() < 1e-9);
                }
            }
        }
    }
}

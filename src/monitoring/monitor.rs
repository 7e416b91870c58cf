use super::alerts::AlertEngine;
use super::models::{ModelHealthRegistry, ModelState};
use super::system::SystemSampler;
use super::tracker::{OperationGuard, OperationRecord, OperationSummary, OperationTracker};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Aggregate request statistics across all models.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_secs: f64,
    /// Number of latencies currently in the rolling buffer
    pub response_samples: u64,
    pub current_memory_pct: f64,
    pub last_error: Option<DateTime<Utc>>,
}

/// Overall health label derived from availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLabel {
    Healthy,
    Degraded,
}

/// System-wide status view.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub monitoring_active: bool,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    /// successful/total; 1.0 before any request was recorded
    pub availability: f64,
    pub avg_response_time_secs: f64,
    pub current_memory_pct: f64,
    pub active_models: usize,
    pub last_error: Option<DateTime<Utc>>,
    pub health: HealthLabel,
}

/// Rolling buffers plus per-model states, for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct RealTimeMetrics {
    pub timestamp: DateTime<Utc>,
    pub response_times: Vec<f64>,
    pub memory_usage: Vec<f64>,
    pub recent_errors: Vec<DateTime<Utc>>,
    pub active_operations: Vec<OperationRecord>,
    pub model_states: HashMap<String, ModelState>,
}

struct RollingState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    response_times: VecDeque<f64>,
    memory_usage: VecDeque<f64>,
    error_marks: VecDeque<DateTime<Utc>>,
    avg_response_time_secs: f64,
    current_memory_pct: f64,
    last_error: Option<DateTime<Utc>>,
    started: Instant,
}

impl RollingState {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            response_times: VecDeque::new(),
            memory_usage: VecDeque::new(),
            error_marks: VecDeque::new(),
            avg_response_time_secs: 0.0,
            current_memory_pct: 0.0,
            last_error: None,
            started: Instant::now(),
        }
    }

    fn refresh_average(&mut self) {
        if self.response_times.is_empty() {
            self.avg_response_time_secs = 0.0;
        } else {
            self.avg_response_time_secs =
                self.response_times.iter().sum::<f64>() / self.response_times.len() as f64;
        }
    }

    fn aggregate(&self) -> AggregateStats {
        AggregateStats {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            avg_response_time_secs: self.avg_response_time_secs,
            response_samples: self.response_times.len() as u64,
            current_memory_pct: self.current_memory_pct,
            last_error: self.last_error,
        }
    }
}

#[derive(Serialize)]
struct ExportPayload {
    export_timestamp: DateTime<Utc>,
    system_status: SystemStatus,
    model_states: HashMap<String, ModelState>,
    performance_summary: HashMap<String, OperationSummary>,
}

/// Top-level monitor: owns the background sampling loop and composes the
/// sampler, operation tracker, model registry and alert engine.
pub struct Monitor {
    config: MonitorConfig,
    sampler: Arc<SystemSampler>,
    tracker: OperationTracker,
    models: Arc<ModelHealthRegistry>,
    alerts: Arc<AlertEngine>,
    rolling: Arc<RwLock<RollingState>>,
    running: Arc<RwLock<bool>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_sampler(config, SystemSampler::new())
    }

    /// Build a monitor around a custom sampler (e.g. one with a GPU probe).
    pub fn with_sampler(config: MonitorConfig, sampler: SystemSampler) -> Self {
        let tracker = OperationTracker::new(config.completed_history, config.latency_window);
        let models = Arc::new(ModelHealthRegistry::new(
            config.latency_window,
            config.thresholds.response_time_secs,
        ));
        let alerts = Arc::new(AlertEngine::new(config.thresholds.clone()));

        Self {
            config,
            sampler: Arc::new(sampler),
            tracker,
            models,
            alerts,
            rolling: Arc::new(RwLock::new(RollingState::new())),
            running: Arc::new(RwLock::new(false)),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn models(&self) -> &ModelHealthRegistry {
        &self.models
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn sampler(&self) -> &SystemSampler {
        &self.sampler
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the background sampling loop.
    ///
    /// Calling `start` while running is a no-op with a warning.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("monitoring already active");
                return;
            }
            *running = true;
        }

        let sampler = Arc::clone(&self.sampler);
        let models = Arc::clone(&self.models);
        let alerts = Arc::clone(&self.alerts);
        let rolling = Arc::clone(&self.rolling);
        let running = Arc::clone(&self.running);
        let rolling_window = self.config.rolling_window;
        let interval = self.config.sample_interval;
        let inactivity_window = self.config.inactivity_window;

        let handle = tokio::spawn(async move {
            info!("monitoring loop started");
            while *running.read().await {
                Self::tick(
                    &sampler,
                    &models,
                    &alerts,
                    &rolling,
                    rolling_window,
                    inactivity_window,
                )
                .await;
                sleep(interval).await;
            }
            info!("monitoring loop exited");
        });

        *self.loop_handle.lock().await = Some(handle);
        info!("monitoring started");
    }

    /// One pass of the sampling loop; ticks never overlap.
    async fn tick(
        sampler: &SystemSampler,
        models: &ModelHealthRegistry,
        alerts: &AlertEngine,
        rolling: &RwLock<RollingState>,
        rolling_window: usize,
        inactivity_window: std::time::Duration,
    ) {
        let snapshot = sampler.sample();

        let stats = {
            let mut state = rolling.write().await;
            state.current_memory_pct = snapshot.mem_pct;
            state.memory_usage.push_back(snapshot.mem_pct);
            while state.memory_usage.len() > rolling_window {
                state.memory_usage.pop_front();
            }
            state.refresh_average();
            state.aggregate()
        };

        let health = models.all_statuses();
        let raised = alerts.evaluate(&snapshot, &health, &stats);
        alerts.dispatch(&raised).await;

        models.evaluate_health(Utc::now(), inactivity_window);
    }

    /// Stop the background loop and wait (bounded) for it to exit.
    ///
    /// Idempotent; stopping a stopped monitor is a no-op.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }

        if let Some(handle) = self.loop_handle.lock().await.take() {
            match timeout(self.config.stop_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("monitoring loop task failed: {}", e),
                Err(_) => warn!(
                    "monitoring loop did not exit within {:?}, detaching",
                    self.config.stop_timeout
                ),
            }
        }
        info!("monitoring stopped");
    }

    /// Record one model request into the aggregate counters and the
    /// per-model registry.
    pub async fn record_request(&self, model: &str, success: bool, latency_secs: f64) {
        {
            let mut state = self.rolling.write().await;
            state.total_requests += 1;
            if success {
                state.successful_requests += 1;
                state.response_times.push_back(latency_secs);
                while state.response_times.len() > self.config.rolling_window {
                    state.response_times.pop_front();
                }
                state.refresh_average();
            } else {
                state.failed_requests += 1;
                let now = Utc::now();
                state.error_marks.push_back(now);
                while state.error_marks.len() > self.config.rolling_window {
                    state.error_marks.pop_front();
                }
                state.last_error = Some(now);
            }
        }

        self.models.record_request(model, success, latency_secs);
    }

    /// Begin a scoped operation; the returned guard ends it on drop.
    pub fn track_operation(
        &self,
        name: &str,
        metadata: HashMap<String, String>,
    ) -> OperationGuard {
        self.tracker.track(name, metadata)
    }

    pub async fn system_status(&self) -> SystemStatus {
        let state = self.rolling.read().await;
        let availability = if state.total_requests == 0 {
            1.0
        } else {
            state.successful_requests as f64 / state.total_requests as f64
        };
        let health = if availability > self.config.thresholds.availability {
            HealthLabel::Healthy
        } else {
            HealthLabel::Degraded
        };

        SystemStatus {
            monitoring_active: *self.running.read().await,
            uptime_seconds: state.started.elapsed().as_secs_f64(),
            total_requests: state.total_requests,
            availability,
            avg_response_time_secs: state.avg_response_time_secs,
            current_memory_pct: state.current_memory_pct,
            active_models: self.models.active_count(),
            last_error: state.last_error,
            health,
        }
    }

    pub async fn real_time_metrics(&self) -> RealTimeMetrics {
        let state = self.rolling.read().await;
        let (active, _) = self.tracker.snapshot();

        RealTimeMetrics {
            timestamp: Utc::now(),
            response_times: state.response_times.iter().copied().collect(),
            memory_usage: state.memory_usage.iter().copied().collect(),
            recent_errors: state.error_marks.iter().copied().collect(),
            active_operations: active,
            model_states: self.models.all_statuses(),
        }
    }

    /// Write the current status, model states and operation summary as JSON.
    ///
    /// An I/O failure is returned to the caller; the monitor keeps running.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<(), MonitorError> {
        let payload = ExportPayload {
            export_timestamp: Utc::now(),
            system_status: self.system_status().await,
            model_states: self.models.all_statuses(),
            performance_summary: self.tracker.performance_summary(),
        };

        let json = serde_json::to_string_pretty(&payload)
            .map_err(|e| MonitorError::Serialize(e.to_string()))?;
        tokio::fs::write(path.as_ref(), json)
            .await
            .map_err(|e| MonitorError::Io(e.to_string()))?;

        info!("monitoring data exported to {}", path.as_ref().display());
        Ok(())
    }

    /// Clear every counter, buffer and model state.
    ///
    /// The background loop, if running, is left running.
    pub async fn reset(&self) {
        {
            let mut state = self.rolling.write().await;
            *state = RollingState::new();
        }
        self.models.clear();
        self.tracker.clear();
        info!("monitoring statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn availability_is_one_without_requests() {
        let monitor = Monitor::new(MonitorConfig::default());
        let status = monitor.system_status().await;
        assert_eq!(status.availability, 1.0);
        assert_eq!(status.health, HealthLabel::Healthy);
        assert!(!status.monitoring_active);
    }

    #[tokio::test]
    async fn aggregate_counters_follow_requests() {
        let monitor = Monitor::new(MonitorConfig::default());
        for _ in 0..5 {
            monitor.record_request("m1", true, 2.0).await;
        }
        monitor.record_request("m1", false, 1.0).await;

        let status = monitor.system_status().await;
        assert_eq!(status.total_requests, 6);
        assert!((status.availability - 5.0 / 6.0).abs() < 1e-9);
        assert!((status.avg_response_time_secs - 2.0).abs() < 1e-9);
        assert!(status.last_error.is_some());

        let state = monitor.models().status("m1").expect("model state missing");
        assert_eq!(state.total_requests, 6);
        assert_eq!(state.successful_requests, 5);
        assert_eq!(state.failed_requests, 1);
        assert_eq!(state.avg_latency_secs, 2.0);
    }

    #[tokio::test]
    async fn degraded_below_availability_threshold() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.record_request("m1", true, 1.0).await;
        monitor.record_request("m1", false, 1.0).await;

        let status = monitor.system_status().await;
        assert_eq!(status.health, HealthLabel::Degraded);
    }

    #[tokio::test]
    async fn response_buffer_is_bounded() {
        let config = MonitorConfig {
            rolling_window: 10,
            ..MonitorConfig::default()
        };
        let monitor = Monitor::new(config);
        for i in 0..25 {
            monitor.record_request("m1", true, i as f64).await;
        }

        let metrics = monitor.real_time_metrics().await;
        assert_eq!(metrics.response_times.len(), 10);
        assert_eq!(metrics.response_times[0], 15.0);
    }

    #[tokio::test]
    async fn reset_clears_counters_and_models() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.record_request("m1", true, 1.0).await;
        let _guard = monitor.track_operation("op", HashMap::new());

        monitor.reset().await;

        let status = monitor.system_status().await;
        assert_eq!(status.total_requests, 0);
        assert!(monitor.models().is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }

    #[tokio::test]
    async fn track_operation_appears_in_real_time_metrics() {
        let monitor = Monitor::new(MonitorConfig::default());
        let guard = monitor.track_operation(
            "pdf_extraction",
            HashMap::from([("file".to_string(), "paper.pdf".to_string())]),
        );

        let metrics = monitor.real_time_metrics().await;
        assert_eq!(metrics.active_operations.len(), 1);
        assert_eq!(metrics.active_operations[0].operation_name, "pdf_extraction");

        drop(guard);
        let metrics = monitor.real_time_metrics().await;
        assert!(metrics.active_operations.is_empty());
    }
}

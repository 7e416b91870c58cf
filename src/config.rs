use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Threshold values the alert engine evaluates each sampling tick.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Memory usage percentage above which a warning is raised
    pub memory_pct: f64,
    /// Average response time (seconds) above which a warning is raised
    pub response_time_secs: f64,
    /// Error rate (failed/total) above which a critical alert is raised
    pub error_rate: f64,
    /// Availability below which the system is reported as degraded
    pub availability: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            memory_pct: 80.0,
            response_time_secs: 30.0,
            error_rate: 0.1,
            availability: 0.95,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Background sampling interval
    pub sample_interval: Duration,
    /// A model with no activity for this long is classified inactive
    pub inactivity_window: Duration,
    /// Capacity of the aggregate rolling buffers (latency, memory, errors)
    pub rolling_window: usize,
    /// Capacity of per-model and per-operation latency buffers
    pub latency_window: usize,
    /// Capacity of the completed-operation history
    pub completed_history: usize,
    /// How long `stop` waits for the sampling loop to exit
    pub stop_timeout: Duration,
    /// Alert thresholds
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            inactivity_window: Duration::from_secs(300),
            rolling_window: 100,
            latency_window: 50,
            completed_history: 100,
            stop_timeout: Duration::from_secs(5),
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Configuration for the experiment-tracking recorder.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Base URL of the tracking service; `None` selects local/in-memory mode
    pub base_url: Option<String>,
    /// Experiment name attached to every run as a tag
    pub experiment_name: String,
    /// Default tags merged into every run's tags
    pub run_tags: HashMap<String, String>,
    /// Per-request timeout for the HTTP store
    pub request_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            experiment_name: "docpipe".to_string(),
            run_tags: HashMap::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TrackingConfig {
    /// Build a configuration from the process environment.
    ///
    /// Reads `DOCPIPE_TRACKING_URI`, `DOCPIPE_EXPERIMENT`, `ENVIRONMENT`
    /// and `USER`.
    pub fn from_env() -> Self {
        let mut run_tags = HashMap::new();
        run_tags.insert(
            "environment".to_string(),
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        );
        run_tags.insert(
            "user".to_string(),
            env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        );

        Self {
            base_url: env::var("DOCPIPE_TRACKING_URI").ok(),
            experiment_name: env::var("DOCPIPE_EXPERIMENT")
                .unwrap_or_else(|_| "docpipe".to_string()),
            run_tags,
            request_timeout: Duration::from_secs(10),
        }
    }
}

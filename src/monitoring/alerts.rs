use super::models::ModelState;
use super::monitor::AggregateStats;
use super::system::SystemSnapshot;
use crate::config::AlertThresholds;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::RwLock;

/// What tripped the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    MemoryHigh,
    ResponseTimeHigh,
    ErrorRateHigh,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// A threshold violation.
///
/// Alerts are constructed, dispatched to callbacks, and dropped; nothing
/// retains them. A condition that persists re-raises on every evaluation,
/// debouncing is the consumer's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Evaluates thresholds and fans alerts out to registered callbacks.
pub struct AlertEngine {
    thresholds: AlertThresholds,
    callbacks: RwLock<Vec<AlertCallback>>,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Register a callback invoked for every dispatched alert.
    ///
    /// Callbacks stay registered for the engine's lifetime; a panicking
    /// callback is isolated, never removed.
    pub async fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write().await;
        callbacks.push(Box::new(callback));
    }

    /// Compare live values against the configured thresholds.
    ///
    /// Pure function; at most one alert per rule per call. The error rate is
    /// failed/total summed across every model in `health`.
    pub fn evaluate(
        &self,
        snapshot: &SystemSnapshot,
        health: &HashMap<String, ModelState>,
        stats: &AggregateStats,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let now = Utc::now();

        if snapshot.mem_pct > self.thresholds.memory_pct {
            alerts.push(Alert {
                kind: AlertKind::MemoryHigh,
                message: format!("Memory usage high: {:.1}%", snapshot.mem_pct),
                severity: AlertSeverity::Warning,
                threshold: self.thresholds.memory_pct,
                timestamp: now,
            });
        }

        if stats.response_samples > 0
            && stats.avg_response_time_secs > self.thresholds.response_time_secs
        {
            alerts.push(Alert {
                kind: AlertKind::ResponseTimeHigh,
                message: format!(
                    "Average response time high: {:.2}s",
                    stats.avg_response_time_secs
                ),
                severity: AlertSeverity::Warning,
                threshold: self.thresholds.response_time_secs,
                timestamp: now,
            });
        }

        let total: u64 = health.values().map(|m| m.total_requests).sum();
        let failed: u64 = health.values().map(|m| m.failed_requests).sum();
        if total > 0 {
            let error_rate = failed as f64 / total as f64;
            if error_rate > self.thresholds.error_rate {
                alerts.push(Alert {
                    kind: AlertKind::ErrorRateHigh,
                    message: format!("Error rate high: {:.1}%", error_rate * 100.0),
                    severity: AlertSeverity::Critical,
                    threshold: self.thresholds.error_rate,
                    timestamp: now,
                });
            }
        }

        alerts
    }

    /// Deliver alerts to every registered callback, in registration order.
    ///
    /// A callback that panics is caught and logged; the remaining callbacks
    /// still run and the sampling loop is never taken down.
    pub async fn dispatch(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }

        let callbacks = self.callbacks.read().await;
        for alert in alerts {
            for (index, callback) in callbacks.iter().enumerate() {
                if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                    error!(
                        "alert callback #{} panicked on {:?} alert; keeping it registered",
                        index, alert.kind
                    );
                }
            }

            match alert.severity {
                AlertSeverity::Critical => error!("CRITICAL ALERT: {}", alert.message),
                AlertSeverity::Warning => warn!("ALERT: {}", alert.message),
                AlertSeverity::Info => info!("{}", alert.message),
            }
        }
    }
}

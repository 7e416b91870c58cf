use super::error::TrackingError;
use super::store::{
    ExperimentRun, HttpTrackingStore, InMemoryTrackingStore, RunQuery, RunStatus, TrackingStore,
};
use crate::config::TrackingConfig;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One model's entry in a comparison.
#[derive(Debug, Clone, Serialize)]
pub struct RunComparison {
    pub run_id: String,
    pub value: Option<f64>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
}

/// The run that won a best-model query.
#[derive(Debug, Clone, Serialize)]
pub struct BestModel {
    pub run_id: String,
    pub model_name: Option<String>,
    pub provider: Option<String>,
    pub value: Option<f64>,
    pub start_time: DateTime<Utc>,
}

/// Facade over an experiment-tracking backend.
///
/// Holds at most one open run. When the backend cannot be reached at
/// construction the recorder degrades: mutating calls return
/// [`TrackingError::Unavailable`], queries return empty results.
///
/// All calls serialize through one lock; tracking backends are generally
/// not safe for concurrent mutation of the same run.
pub struct ExperimentRecorder {
    store: Arc<dyn TrackingStore>,
    config: TrackingConfig,
    available: bool,
    current: Mutex<Option<ExperimentRun>>,
}

impl ExperimentRecorder {
    /// Probe the backend once and build the recorder.
    pub async fn connect(config: TrackingConfig, store: Arc<dyn TrackingStore>) -> Self {
        let available = match store.ping().await {
            Ok(()) => {
                info!("tracking service reachable");
                true
            }
            Err(e) => {
                warn!("tracking service unavailable ({}); recorder degraded", e);
                false
            }
        };

        Self {
            store,
            config,
            available,
            current: Mutex::new(None),
        }
    }

    /// Pick a store from the configuration and connect.
    ///
    /// A configured base URL selects the HTTP store; otherwise runs are kept
    /// in the in-process store.
    pub async fn from_config(config: TrackingConfig) -> Self {
        let store: Arc<dyn TrackingStore> = match config.base_url.as_deref() {
            Some(url) => match HttpTrackingStore::new(url, config.request_timeout) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(
                        "failed to build tracking client ({}); falling back to in-memory store",
                        e
                    );
                    Arc::new(InMemoryTrackingStore::new())
                }
            },
            None => Arc::new(InMemoryTrackingStore::new()),
        };
        Self::connect(config, store).await
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub async fn current_run_id(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(|r| r.run_id.clone())
    }

    /// Open a new run.
    ///
    /// Fails with `RunAlreadyActive` while another run is open; a run must
    /// be ended before the next one starts. Without a name the run is named
    /// after the start timestamp.
    pub async fn start_run(
        &self,
        name: Option<&str>,
        tags: HashMap<String, String>,
    ) -> Result<String, TrackingError> {
        if !self.available {
            return Err(TrackingError::Unavailable);
        }

        let mut current = self.current.lock().await;
        if current.is_some() {
            return Err(TrackingError::RunAlreadyActive);
        }

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S")));

        let mut all_tags = self.config.run_tags.clone();
        all_tags.insert(
            "experiment".to_string(),
            self.config.experiment_name.clone(),
        );
        all_tags.extend(tags);

        let run = ExperimentRun {
            run_id: Uuid::new_v4().to_string(),
            name: name.clone(),
            tags: all_tags,
            start_time: Utc::now(),
            end_time: None,
            params: HashMap::new(),
            metrics: BTreeMap::new(),
        };

        self.store.create_run(&run).await?;
        let run_id = run.run_id.clone();
        *current = Some(run);
        info!("experiment run started: {} ({})", name, run_id);
        Ok(run_id)
    }

    /// Attach parameters to the current run.
    pub async fn log_params(&self, params: HashMap<String, String>) -> Result<(), TrackingError> {
        if !self.available {
            return Err(TrackingError::Unavailable);
        }

        let mut current = self.current.lock().await;
        let run = current.as_mut().ok_or(TrackingError::NoActiveRun)?;
        self.store.log_params(&run.run_id, &params).await?;
        run.params.extend(params);
        Ok(())
    }

    /// Append metric values to the current run's series.
    pub async fn log_metrics(&self, metrics: HashMap<String, f64>) -> Result<(), TrackingError> {
        if !self.available {
            return Err(TrackingError::Unavailable);
        }

        let mut current = self.current.lock().await;
        let run = current.as_mut().ok_or(TrackingError::NoActiveRun)?;
        self.store.log_metrics(&run.run_id, &metrics).await?;
        for (name, value) in metrics {
            run.metrics.entry(name).or_default().push(value);
        }
        Ok(())
    }

    /// Close the current run. A no-op when no run is open.
    pub async fn end_run(&self) -> Result<(), TrackingError> {
        let mut current = self.current.lock().await;
        let Some(run) = current.as_ref() else {
            return Ok(());
        };

        let end_time = Utc::now();
        self.store.finish_run(&run.run_id, end_time).await?;
        info!("experiment run finished: {}", run.run_id);
        *current = None;
        Ok(())
    }

    /// Compare models on a metric over their historical runs.
    ///
    /// Runs are matched on the `model_name` parameter and ordered ascending
    /// by the metric's latest value; the best run per model wins. An
    /// unreachable service or an empty result both yield an empty map.
    pub async fn compare_models(
        &self,
        model_names: &[String],
        metric: &str,
    ) -> HashMap<String, RunComparison> {
        if !self.available {
            return HashMap::new();
        }

        let query = RunQuery {
            param_filters: HashMap::from([("model_name".to_string(), model_names.to_vec())]),
            order_by_metric: Some(metric.to_string()),
            ascending: true,
            max_results: None,
        };

        let runs = match self.store.search_runs(&query).await {
            Ok(runs) => runs,
            Err(e) => {
                error!("model comparison query failed: {}", e);
                return HashMap::new();
            }
        };

        let mut comparison = HashMap::new();
        for run in runs {
            let Some(model) = run.params.get("model_name").cloned() else {
                continue;
            };
            comparison.entry(model).or_insert_with(|| RunComparison {
                run_id: run.run_id.clone(),
                value: run.latest_metric(metric),
                status: run.status(),
                start_time: run.start_time,
            });
        }
        comparison
    }

    /// The single best run by a metric, in the requested direction.
    pub async fn best_model(&self, metric: &str, ascending: bool) -> Option<BestModel> {
        if !self.available {
            return None;
        }

        let query = RunQuery {
            param_filters: HashMap::new(),
            order_by_metric: Some(metric.to_string()),
            ascending,
            max_results: Some(1),
        };

        let runs = match self.store.search_runs(&query).await {
            Ok(runs) => runs,
            Err(e) => {
                error!("best-model query failed: {}", e);
                return None;
            }
        };

        runs.into_iter().next().map(|run| BestModel {
            run_id: run.run_id.clone(),
            model_name: run.params.get("model_name").cloned(),
            provider: run.params.get("provider").cloned(),
            value: run.latest_metric(metric),
            start_time: run.start_time,
        })
    }

    /// Dump every known run to a flat CSV table.
    ///
    /// Columns: run id, name, status, times, then the union of `param.*`
    /// and `metric.*` columns across all runs (metrics use latest values).
    pub async fn export_csv(&self, path: impl AsRef<Path>) -> Result<(), TrackingError> {
        if !self.available {
            return Err(TrackingError::Unavailable);
        }

        let runs = self.store.search_runs(&RunQuery::default()).await?;

        let mut param_cols: BTreeSet<String> = BTreeSet::new();
        let mut metric_cols: BTreeSet<String> = BTreeSet::new();
        for run in &runs {
            param_cols.extend(run.params.keys().cloned());
            metric_cols.extend(run.metrics.keys().cloned());
        }

        let mut out = String::new();
        out.push_str("run_id,name,status,start_time,end_time");
        for col in &param_cols {
            out.push_str(&format!(",param.{}", col));
        }
        for col in &metric_cols {
            out.push_str(&format!(",metric.{}", col));
        }
        out.push('\n');

        for run in &runs {
            out.push_str(&csv_field(&run.run_id));
            out.push(',');
            out.push_str(&csv_field(&run.name));
            out.push_str(&format!(",{:?}", run.status()));
            out.push_str(&format!(",{}", run.start_time.to_rfc3339()));
            out.push(',');
            if let Some(end) = run.end_time {
                out.push_str(&end.to_rfc3339());
            }
            for col in &param_cols {
                out.push(',');
                if let Some(value) = run.params.get(col) {
                    out.push_str(&csv_field(value));
                }
            }
            for col in &metric_cols {
                out.push(',');
                if let Some(value) = run.latest_metric(col) {
                    out.push_str(&value.to_string());
                }
            }
            out.push('\n');
        }

        tokio::fs::write(path.as_ref(), out)
            .await
            .map_err(|e| TrackingError::Io(e.to_string()))?;
        info!(
            "exported {} runs to {}",
            runs.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Remove runs older than `days_to_keep` days.
    pub async fn cleanup_old_runs(&self, days_to_keep: i64) -> Result<usize, TrackingError> {
        if !self.available {
            return Err(TrackingError::Unavailable);
        }

        let cutoff = Utc::now() - ChronoDuration::days(days_to_keep);
        let deleted = self.store.delete_runs_before(cutoff).await?;
        if deleted > 0 {
            info!("removed {} runs older than {} days", deleted, days_to_keep);
        }
        Ok(deleted)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

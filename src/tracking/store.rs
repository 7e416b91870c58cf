use super::error::TrackingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

/// One named, time-bounded unit of recorded parameters and metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub run_id: String,
    pub name: String,
    pub tags: HashMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: HashMap<String, String>,
    /// Metric name to the sequence of values logged over the run's lifetime
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl ExperimentRun {
    pub fn status(&self) -> RunStatus {
        if self.end_time.is_some() {
            RunStatus::Finished
        } else {
            RunStatus::Running
        }
    }

    /// Most recently logged value of a metric.
    pub fn latest_metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|values| values.last().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
}

/// Filter and ordering for run searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunQuery {
    /// Param name to accepted values; an empty map matches every run
    pub param_filters: HashMap<String, Vec<String>>,
    /// Order results by this metric's latest value; runs without the metric
    /// sort last regardless of direction
    pub order_by_metric: Option<String>,
    pub ascending: bool,
    pub max_results: Option<usize>,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            param_filters: HashMap::new(),
            order_by_metric: None,
            ascending: true,
            max_results: None,
        }
    }
}

/// Write/query interface to an experiment-tracking backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn ping(&self) -> Result<(), TrackingError>;
    async fn create_run(&self, run: &ExperimentRun) -> Result<(), TrackingError>;
    async fn log_params(
        &self,
        run_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<(), TrackingError>;
    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &HashMap<String, f64>,
    ) -> Result<(), TrackingError>;
    async fn finish_run(&self, run_id: &str, end_time: DateTime<Utc>) -> Result<(), TrackingError>;
    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<ExperimentRun>, TrackingError>;
    /// Delete runs that started before `cutoff`; returns how many were removed.
    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackingError>;
}

fn matches_query(run: &ExperimentRun, query: &RunQuery) -> bool {
    query.param_filters.iter().all(|(param, allowed)| {
        run.params
            .get(param)
            .map(|value| allowed.contains(value))
            .unwrap_or(false)
    })
}

fn sort_runs(runs: &mut Vec<ExperimentRun>, query: &RunQuery) {
    if let Some(metric) = &query.order_by_metric {
        runs.sort_by(|a, b| {
            match (a.latest_metric(metric), b.latest_metric(metric)) {
                (Some(x), Some(y)) => {
                    let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                    if query.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }
    if let Some(max) = query.max_results {
        runs.truncate(max);
    }
}

/// In-process store, used as the local mode and in tests.
pub struct InMemoryTrackingStore {
    runs: RwLock<HashMap<String, ExperimentRun>>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

impl Default for InMemoryTrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn ping(&self) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn create_run(&self, run: &ExperimentRun) -> Result<(), TrackingError> {
        self.runs
            .write()
            .await
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn log_params(
        &self,
        run_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<(), TrackingError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::Api(format!("unknown run: {}", run_id)))?;
        run.params.extend(params.clone());
        Ok(())
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &HashMap<String, f64>,
    ) -> Result<(), TrackingError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::Api(format!("unknown run: {}", run_id)))?;
        for (name, value) in metrics {
            run.metrics.entry(name.clone()).or_default().push(*value);
        }
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, end_time: DateTime<Utc>) -> Result<(), TrackingError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::Api(format!("unknown run: {}", run_id)))?;
        run.end_time = Some(end_time);
        Ok(())
    }

    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<ExperimentRun>, TrackingError> {
        let runs = self.runs.read().await;
        let mut matched: Vec<ExperimentRun> = runs
            .values()
            .filter(|run| matches_query(run, query))
            .cloned()
            .collect();
        sort_runs(&mut matched, query);
        Ok(matched)
    }

    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackingError> {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, run| run.start_time >= cutoff);
        Ok(before - runs.len())
    }
}

/// HTTP store speaking the tracking service's JSON API.
pub struct HttpTrackingStore {
    client: Client,
    base_url: String,
}

impl HttpTrackingStore {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TrackingError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, TrackingError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| TrackingError::Network(e.to_string()))?;
        Self::check_status(response)
    }

    fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TrackingError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(TrackingError::Api(format!(
                "tracking service returned {}",
                response.status()
            )))
        }
    }
}

#[derive(Deserialize)]
struct CleanupResponse {
    deleted: usize,
}

#[async_trait]
impl TrackingStore for HttpTrackingStore {
    async fn ping(&self) -> Result<(), TrackingError> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await
            .map_err(|e| TrackingError::Network(e.to_string()))?;
        Self::check_status(response)?;
        Ok(())
    }

    async fn create_run(&self, run: &ExperimentRun) -> Result<(), TrackingError> {
        self.post_json("/api/runs", run).await?;
        Ok(())
    }

    async fn log_params(
        &self,
        run_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<(), TrackingError> {
        self.post_json(&format!("/api/runs/{}/params", run_id), params)
            .await?;
        Ok(())
    }

    async fn log_metrics(
        &self,
        run_id: &str,
        metrics: &HashMap<String, f64>,
    ) -> Result<(), TrackingError> {
        self.post_json(&format!("/api/runs/{}/metrics", run_id), metrics)
            .await?;
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, end_time: DateTime<Utc>) -> Result<(), TrackingError> {
        self.post_json(
            &format!("/api/runs/{}/finish", run_id),
            &serde_json::json!({ "end_time": end_time }),
        )
        .await?;
        Ok(())
    }

    async fn search_runs(&self, query: &RunQuery) -> Result<Vec<ExperimentRun>, TrackingError> {
        let response = self.post_json("/api/runs/search", query).await?;
        response
            .json::<Vec<ExperimentRun>>()
            .await
            .map_err(|e| TrackingError::Parse(e.to_string()))
    }

    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackingError> {
        let response = self
            .post_json("/api/runs/cleanup", &serde_json::json!({ "before": cutoff }))
            .await?;
        let body = response
            .json::<CleanupResponse>()
            .await
            .map_err(|e| TrackingError::Parse(e.to_string()))?;
        Ok(body.deleted)
    }
}

pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod tracking;

pub use config::{AlertThresholds, MonitorConfig, TrackingConfig};
pub use error::MonitorError;
pub use logging::init_logging;
pub use monitoring::{
    Alert, AlertEngine, AlertKind, AlertSeverity, GpuProbe, GpuSample, HealthLabel,
    ModelHealthRegistry, ModelReport, ModelState, ModelStatus, Monitor, NoGpuProbe,
    OperationGuard, OperationHandle, OperationRecord, OperationSummary, OperationTracker,
    RealTimeMetrics, SystemSampler, SystemSnapshot, SystemStatus,
};
pub use tracking::{
    BestModel, ExperimentRecorder, ExperimentRun, HttpTrackingStore, InMemoryTrackingStore,
    RunComparison, RunQuery, RunStatus, TrackingError, TrackingStore,
};

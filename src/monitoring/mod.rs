/// Host sampling, per-model health, operation tracking and alerting
pub mod alerts;
pub mod models;
pub mod monitor;
pub mod system;
pub mod tracker;

pub use alerts::{Alert, AlertEngine, AlertKind, AlertSeverity};
pub use models::{ModelHealthRegistry, ModelReport, ModelState, ModelStatus};
pub use monitor::{AggregateStats, HealthLabel, Monitor, RealTimeMetrics, SystemStatus};
pub use system::{GpuProbe, GpuSample, NoGpuProbe, SystemSampler, SystemSnapshot};
pub use tracker::{
    OperationGuard, OperationHandle, OperationRecord, OperationSummary, OperationTracker,
};

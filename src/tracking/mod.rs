/// Experiment-tracking facade and backends
pub mod error;
pub mod recorder;
pub mod store;

pub use error::TrackingError;
pub use recorder::{BestModel, ExperimentRecorder, RunComparison};
pub use store::{
    ExperimentRun, HttpTrackingStore, InMemoryTrackingStore, RunQuery, RunStatus, TrackingStore,
};

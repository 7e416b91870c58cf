use std::fmt;

/// Errors from the experiment-tracking facade and its stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// The tracking service could not be reached at startup; the recorder
    /// is running in degraded mode
    Unavailable,
    /// `start_run` was called while another run is still open
    RunAlreadyActive,
    /// A log call arrived with no open run
    NoActiveRun,
    Network(String),
    Api(String),
    Parse(String),
    Io(String),
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::Unavailable => write!(f, "tracking service unavailable"),
            TrackingError::RunAlreadyActive => {
                write!(f, "an experiment run is already active")
            }
            TrackingError::NoActiveRun => write!(f, "no active experiment run"),
            TrackingError::Network(msg) => write!(f, "Network error: {}", msg),
            TrackingError::Api(msg) => write!(f, "API error: {}", msg),
            TrackingError::Parse(msg) => write!(f, "Parse error: {}", msg),
            TrackingError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TrackingError {}

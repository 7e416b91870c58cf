use std::fmt;

/// Errors surfaced by the monitoring side of the crate.
///
/// Sampling itself never fails (unreadable counters degrade to zero values),
/// so this covers the export path only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    Io(String),
    Serialize(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(msg) => write!(f, "I/O error: {}", msg),
            MonitorError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {}

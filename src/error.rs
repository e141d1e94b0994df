//! Error types for the scheduler core.

/// Result type used throughout the scheduler.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error type covering every failure the control core recognises.
///
/// Policy: the observation loop recovers locally whenever it can make
/// forward progress on the next tick (bad weather, bad readouts, focus
/// fallback); only `FatalState` and a terminate signal end the program
/// while observations are running.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("input parse error at line {line}: {reason}")]
    InputParse { line: usize, reason: String },

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: f64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("camera error: {0}")]
    Camera(String),

    #[error("focus did not converge: target {target} mm, achieved {achieved} mm")]
    Focus { target: f64, achieved: f64 },

    #[error("fatal state error: {0}")]
    FatalState(String),
}

impl From<std::io::Error> for SchedulerError {
    fn from(e: std::io::Error) -> Self {
        SchedulerError::Network(e.to_string())
    }
}

impl From<String> for SchedulerError {
    fn from(s: String) -> Self {
        SchedulerError::FatalState(s)
    }
}

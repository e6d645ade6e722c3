use thiserror::Error;

/// Failures the tracker meets at runtime. None of them stops tracking: a failed resolution means
/// nothing is active, a failed write loses that one interval, a clock anomaly counts as zero.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("could not resolve an entity from {0:?}")]
    Resolution(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("clock moved backwards by {behind_ms}ms")]
    ClockAnomaly { behind_ms: i64 },
}

impl TrackError {
    pub fn storage(error: impl std::fmt::Display) -> Self {
        TrackError::StorageUnavailable(format!("{error:#}"))
    }
}

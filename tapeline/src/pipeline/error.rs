//! Error types for the backup pipeline.

use crate::catalog::CatalogError;
use crate::changer::ChangerError;
use crate::source::SourceError;
use crate::tape::TapeError;
use thiserror::Error;

/// Errors that end a producer walk, a consumer run, or a single job.
///
/// [`PipelineError::Interrupted`] is the sentinel for operator signals; it
/// bypasses job finalisation so the orchestrator can move the claimed job to
/// Interrupted instead of InComplete.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Operator requested shutdown
    #[error("Signal Interrupt")]
    Interrupted,

    /// Catalog operation failed
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Tape device operation failed
    #[error(transparent)]
    Tape(#[from] TapeError),

    /// Media changer operation failed
    #[error(transparent)]
    Changer(#[from] ChangerError),

    /// Source filesystem operation failed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Every cartridge in the pool is full or quarantined
    #[error("no usable tape remains in pool {0}")]
    PoolExhausted(i64),

    /// The catalog says the pool's drive holds no cartridge
    #[error("no tape is mounted in the drive for pool {0}")]
    DriveEmpty(i64),

    /// The consumer reported an error over the back-channel
    #[error("walk aborted: consumer reported '{0}'")]
    ConsumerFailed(String),

    /// A spawned task died before delivering a result
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// True for the operator-signal sentinel.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, PipelineError::Interrupted)
    }

    /// True when a tape write hit end of media, the one retryable failure.
    pub fn is_end_of_media(&self) -> bool {
        matches!(self, PipelineError::Tape(TapeError::EndOfMedia))
    }
}

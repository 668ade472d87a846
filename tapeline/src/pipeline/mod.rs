//! Backup pipeline - producer/consumer over the Job table.
//!
//! Each pool runs one pipeline: a [`Producer`] walking the source tree and
//! enqueuing directory-granular jobs into the catalog, and a [`Consumer`]
//! draining those jobs onto tape. The two run as parallel tasks and meet
//! only through the Job table plus two channels:
//!
//! - a `oneshot` carrying the producer's completion (clean or error), and
//! - a `watch` back-channel letting the consumer's failure abort the walk.
//!
//! Cancellation is cooperative: the shared token is checked at the walk's
//! per-entry callback, at the consumer's per-file loop head, and while
//! sleeping between empty claims.

mod consumer;
mod error;
mod producer;

pub use consumer::{Consumer, ConsumerConfig, TapeSwapper, DEFAULT_IDLE_BACKOFF};
pub use error::PipelineError;
pub use producer::Producer;

use crate::tape::{TapeError, TapeUnit};
use std::sync::{Arc, Mutex};

/// A tape handle shared between the consumer and the tape-change sequence.
///
/// Device calls block in the kernel, so they run under `spawn_blocking`; the
/// mutex hands the device to whichever task is inside such a section.
pub type SharedTape = Arc<Mutex<Box<dyn TapeUnit>>>;

/// Run one blocking tape operation off the async runtime.
pub async fn with_tape<T, F>(tape: &SharedTape, op: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn TapeUnit) -> Result<T, TapeError> + Send + 'static,
{
    let tape = Arc::clone(tape);
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = tape.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        op(guard.as_mut())
    })
    .await
    .map_err(|join| PipelineError::TaskFailed(join.to_string()))?;
    result.map_err(PipelineError::from)
}

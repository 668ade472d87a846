//! Catalog gateway - typed operations over the backup catalog.
//!
//! This is the only module that speaks to the database. Every state
//! transition of the Job/Tape/Storage lifecycle goes through one of the
//! operations below, so catalog consistency is auditable in one place:
//!
//! - Jobs move `Initialized → In-Progress → {Complete, InComplete, Interrupted}`.
//! - A File row is only recorded after its bytes are on tape, and always
//!   after a JobTapeMap row exists for the same (job, tape).
//! - Tape/Storage rows mirror the physical library after every arm motion,
//!   so an operator can recover from a half-finished swap.
//!
//! Operations return a typed [`CatalogError`] on failure; none retry
//! internally.

mod error;
mod models;
mod pg;

pub use error::CatalogError;
pub use models::{DriveStatus, JobRow, JobState, PathSpecRow, SlotTape};
pub use pg::{sibling_name_pattern, PgCatalog};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Typed operations over the backup catalog.
///
/// Implemented by [`PgCatalog`] for PostgreSQL; pipeline tests substitute an
/// in-memory store behind the same seam.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up the PathSpec for `path`, inserting one with `schedule_class`
    /// if the path is unknown. A unique violation from a concurrent insert
    /// is ignored and the row re-read.
    async fn get_or_insert_path_spec(
        &self,
        path: &str,
        schedule_class: &str,
    ) -> Result<PathSpecRow, CatalogError>;

    /// True iff a Job exists for (path, pool) in state Initialized or
    /// In-Progress. Used by the producer to suppress duplicate enqueues.
    async fn job_exists(&self, path: &str, pool_id: i64) -> Result<bool, CatalogError>;

    /// Insert a fresh job in state Initialized.
    async fn insert_job(
        &self,
        path: &str,
        pool_id: i64,
        path_spec_id: i64,
    ) -> Result<(), CatalogError>;

    /// In a single transaction, select the lowest-id Initialized job for the
    /// pool and move it to In-Progress with `claim_time` as its start time.
    /// Returns `None` when no job is waiting.
    async fn claim_next_job(
        &self,
        pool_id: i64,
        claim_time: DateTime<Utc>,
    ) -> Result<Option<JobRow>, CatalogError>;

    /// Close out a job with its final state, duration and file count.
    async fn update_job_final(
        &self,
        job: &JobRow,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        file_count: i64,
        state: JobState,
    ) -> Result<(), CatalogError>;

    /// Record that `job_id` spans the given tape.
    async fn map_job_to_tape(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
    ) -> Result<(), CatalogError>;

    /// Record one successfully written file at its file-mark ordinal.
    async fn record_file(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
        file_mark: i64,
    ) -> Result<(), CatalogError>;

    /// Start time of the most recent Complete job for (path, pool), or the
    /// year-0001 sentinel if none exists.
    async fn last_completed_start(
        &self,
        path: &str,
        pool_id: i64,
    ) -> Result<DateTime<Utc>, CatalogError>;

    /// Device path of the tape drive joined to the pool.
    async fn storage_for_pool(&self, pool_id: i64) -> Result<String, CatalogError>;

    /// Changer drive index and currently mounted tape for a device path.
    async fn tape_in_storage(&self, device_path: &str) -> Result<DriveStatus, CatalogError>;

    /// Lowest-named usable cartridge still in a library slot for the pool
    /// (slot != 0, not full, not quarantined). `None` when exhausted.
    async fn next_tape_in_pool(&self, pool_id: i64) -> Result<Option<SlotTape>, CatalogError>;

    /// Reflect a cartridge's new physical placement and flags.
    async fn update_tape_row(
        &self,
        slot: i64,
        is_full: bool,
        error_in_tape: bool,
        tape_id: i64,
    ) -> Result<(), CatalogError>;

    /// Set (or clear, with `None`) the tape mounted in a drive.
    async fn update_storage_tape(
        &self,
        tape_id: Option<i64>,
        device_path: &str,
    ) -> Result<(), CatalogError>;

    /// Transition every In-Progress job for the pool to Interrupted.
    async fn interrupt_open_jobs(&self, pool_id: i64) -> Result<(), CatalogError>;

    /// Quarantine the tape currently in the pool's drive with a reason.
    async fn record_tape_error(&self, pool_id: i64, reason: &str) -> Result<(), CatalogError>;

    /// Sibling pool id for the paired drive at the other location.
    async fn find_pair(&self, pool_id: i64) -> Result<i64, CatalogError>;
}

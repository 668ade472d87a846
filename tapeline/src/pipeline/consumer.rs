//! Job consumer - drains claimed jobs onto the tape drive.

use super::{with_tape, PipelineError, SharedTape};
use crate::catalog::{CatalogStore, JobRow, JobState};
use crate::source::{SourceEntry, SourceStore};
use crate::tape::{TapeError, TarEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sleep between empty claims while the producer is still walking.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(500);

/// Swaps an exhausted cartridge for a fresh one from the pool.
///
/// Implemented by the pair coordinator, which owns the shared arm mutex the
/// whole sequence must run under. Returns the new tape id.
#[async_trait]
pub trait TapeSwapper: Send + Sync {
    async fn change_tape(&self) -> Result<i64, PipelineError>;
}

/// Per-consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub pool_id: i64,
    /// Drive device path, the Storage row key.
    pub device_path: String,
    /// Files larger than this are skipped.
    pub size_cap_bytes: u64,
    pub idle_backoff: Duration,
}

/// Pulls jobs for one pool, streams their files to tape, and keeps the
/// catalog's job lifecycle moving.
pub struct Consumer {
    catalog: Arc<dyn CatalogStore>,
    source: Arc<dyn SourceStore>,
    tape: SharedTape,
    swapper: Arc<dyn TapeSwapper>,
    config: ConsumerConfig,
    cancel: CancellationToken,
}

impl Consumer {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        source: Arc<dyn SourceStore>,
        tape: SharedTape,
        swapper: Arc<dyn TapeSwapper>,
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            source,
            tape,
            swapper,
            config,
            cancel,
        }
    }

    /// Drain jobs until the producer has completed cleanly and the pool's
    /// queue is empty, or until an error or interrupt ends the run.
    pub async fn run(
        self,
        mut producer_done: oneshot::Receiver<Result<(), PipelineError>>,
    ) -> Result<(), PipelineError> {
        // Append after existing data; one-time per run.
        with_tape(&self.tape, |tape| tape.jump_to_end_of_media()).await?;

        let mut producer_finished = false;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }

            if !producer_finished {
                match producer_done.try_recv() {
                    Ok(Ok(())) => producer_finished = true,
                    // A failed walk fails the run.
                    Ok(Err(err)) => return Err(err),
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => {
                        return Err(PipelineError::TaskFailed(
                            "producer exited without a result".to_string(),
                        ))
                    }
                }
            }

            let claim_time = Utc::now();
            let Some(job) = self
                .catalog
                .claim_next_job(self.config.pool_id, claim_time)
                .await?
            else {
                if producer_finished {
                    // Queue drained and no more jobs are coming.
                    return Ok(());
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(PipelineError::Interrupted),
                    _ = tokio::time::sleep(self.config.idle_backoff) => {}
                }
                continue;
            };

            info!(job = job.id, dir = %job.name, pool = self.config.pool_id, "job claimed");
            self.execute_job(&job, claim_time).await?;
        }
    }

    /// Stream one job's directory, then finalise the job row.
    ///
    /// Finalisation is attempted even on the error path; a failure of that
    /// final update supersedes the original error. An interrupt skips
    /// finalisation so the orchestrator can mark the job Interrupted.
    async fn execute_job(
        &self,
        job: &JobRow,
        claim_time: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let mut files_added = 0i64;
        let outcome = self.stream_directory(job, &mut files_added).await;
        let duration = crate::time::whole_minutes(claim_time, Utc::now());

        match outcome {
            Ok(()) => {
                self.catalog
                    .update_job_final(job, claim_time, duration, files_added, JobState::Complete)
                    .await?;
                info!(job = job.id, files = files_added, duration, "job complete");
                Ok(())
            }
            Err(err) if err.is_interrupt() => Err(err),
            Err(err) => {
                warn!(job = job.id, error = %err, "job failed");
                self.catalog
                    .update_job_final(job, claim_time, duration, files_added, JobState::Incomplete)
                    .await?;
                Err(err)
            }
        }
    }

    /// Write every eligible direct child of the job's directory.
    async fn stream_directory(
        &self,
        job: &JobRow,
        files_added: &mut i64,
    ) -> Result<(), PipelineError> {
        let drive = self.catalog.tape_in_storage(&self.config.device_path).await?;
        let mut tape_id = drive
            .tape_id
            .ok_or(PipelineError::DriveEmpty(self.config.pool_id))?;

        // The job spans this tape before any File row lands on it.
        self.catalog
            .map_job_to_tape(&job.name, job.id, tape_id)
            .await?;

        let last_start = self
            .catalog
            .last_completed_start(&job.name, self.config.pool_id)
            .await?;

        let entries = self.source.read_dir(&job.name).await?;
        for entry in entries {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            if !self.backup_needed(&entry, last_start) {
                continue;
            }

            tape_id = self.write_one_file(job, &entry, tape_id).await?;

            // Drive-reported file number, read before the terminating mark.
            let mark = with_tape(&self.tape, |tape| tape.file_mark_number()).await?;
            self.catalog
                .record_file(&entry.path, job.id, tape_id, mark)
                .await?;
            *files_added += 1;

            with_tape(&self.tape, |tape| tape.write_file_mark()).await?;
        }
        Ok(())
    }

    /// Stream one file, swapping cartridges on end of media. Returns the
    /// tape id the file finally landed on.
    async fn write_one_file(
        &self,
        job: &JobRow,
        entry: &SourceEntry,
        tape_id: i64,
    ) -> Result<i64, PipelineError> {
        let mut reader = self.source.open(&entry.path).await?;
        let tar_entry = tar_entry_for(entry);

        let first_try = with_tape(&self.tape, {
            let tar_entry = tar_entry.clone();
            move |tape| tape.write_file(&tar_entry, reader.as_mut())
        })
        .await;

        match first_try {
            Ok(()) => Ok(tape_id),
            Err(PipelineError::Tape(TapeError::EndOfMedia)) => {
                debug!(path = %entry.path, "end of media mid-file, swapping cartridge");
                let new_tape = self.swapper.change_tape().await?;

                // The partial copy died with the old cartridge; start the
                // file over on the fresh one.
                let mut retry_reader = self.source.open(&entry.path).await?;
                with_tape(&self.tape, {
                    let tar_entry = tar_entry.clone();
                    move |tape| tape.write_file(&tar_entry, retry_reader.as_mut())
                })
                .await?;

                self.catalog
                    .map_job_to_tape(&job.name, job.id, new_tape)
                    .await?;
                Ok(new_tape)
            }
            Err(err) => Err(err),
        }
    }

    /// Coarse incremental policy: regular files only, under the size cap,
    /// modified at or after the directory's last completed backup.
    fn backup_needed(&self, entry: &SourceEntry, last_start: DateTime<Utc>) -> bool {
        if entry.is_dir {
            return false;
        }
        if entry.size > self.config.size_cap_bytes {
            return false;
        }
        entry.mtime >= last_start
    }
}

fn tar_entry_for(entry: &SourceEntry) -> TarEntry {
    TarEntry {
        path: entry.path.clone(),
        size: entry.size,
        mode: entry.mode,
        mtime: entry.mtime,
    }
}

//! Job producer - walks the source tree and enqueues directory jobs.

use super::PipelineError;
use crate::catalog::CatalogStore;
use crate::source::SourceStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Walks a source root depth-first and inserts one Initialized job per
/// directory enrolled in the run's schedule class.
pub struct Producer {
    catalog: Arc<dyn CatalogStore>,
    source: Arc<dyn SourceStore>,
    pool_id: i64,
    cancel: CancellationToken,
}

impl Producer {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        source: Arc<dyn SourceStore>,
        pool_id: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            source,
            pool_id,
            cancel,
        }
    }

    /// Walk `root` and enqueue jobs for `schedule_class`.
    ///
    /// Aborts with [`PipelineError::Interrupted`] on cancellation and with
    /// [`PipelineError::ConsumerFailed`] when the back-channel reports the
    /// consumer went down. Walk-level listing errors fail the whole run.
    pub async fn run(
        self,
        root: &str,
        schedule_class: &str,
        consumer_errors: watch::Receiver<Option<String>>,
    ) -> Result<(), PipelineError> {
        debug!(root, schedule_class, pool = self.pool_id, "walk started");
        let mut enqueued = 0u64;

        // Depth-first over directories; jobs are directory-granular, so
        // plain files are never visited.
        let mut stack = vec![root.to_string()];
        while let Some(dir) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            if let Some(reported) = consumer_errors.borrow().clone() {
                return Err(PipelineError::ConsumerFailed(reported));
            }

            if self.visit_directory(&dir, schedule_class).await? {
                enqueued += 1;
            }

            let children = self.source.read_dir(&dir).await?;
            // Reverse push keeps the walk in listing order.
            for child in children.into_iter().rev() {
                if child.is_dir {
                    stack.push(child.path);
                }
            }
        }

        debug!(root, enqueued, pool = self.pool_id, "walk complete");
        Ok(())
    }

    /// Apply the enqueue policy to one directory. Returns true if a job was
    /// inserted.
    async fn visit_directory(
        &self,
        dir: &str,
        schedule_class: &str,
    ) -> Result<bool, PipelineError> {
        // Unknown directories are enrolled into the current run's class.
        let path_spec = self
            .catalog
            .get_or_insert_path_spec(dir, schedule_class)
            .await?;

        // Directories belonging to another recurrence are someone else's.
        if path_spec.schedule != schedule_class {
            trace!(dir, have = %path_spec.schedule, want = schedule_class, "schedule mismatch");
            return Ok(false);
        }

        // Suppress duplicates while an earlier job is still open.
        if self.catalog.job_exists(dir, self.pool_id).await? {
            trace!(dir, "job already pending");
            return Ok(false);
        }

        self.catalog
            .insert_job(dir, self.pool_id, path_spec.id)
            .await?;
        trace!(dir, "job enqueued");
        Ok(true)
    }
}

//! Pair coordinator - two pipelines sharing one robotic arm.
//!
//! A pair is two pools (and their drives) backing up the same content at
//! different physical locations. The drives sit in one library and share its
//! single robotic arm, so the entire cartridge-swap sequence of either
//! pipeline must run under one mutex: the arm's state is non-atomic, and
//! interleaving two swaps would leave cartridges in limbo.
//!
//! The pair is a shared-mutex composition of two independent
//! [`BackupPipeline`]s, nothing more; apart from the arm they never
//! coordinate.

use crate::catalog::CatalogStore;
use crate::changer::Changer;
use crate::config::ConfigFile;
use crate::pipeline::{
    with_tape, Consumer, ConsumerConfig, PipelineError, Producer, SharedTape, TapeSwapper,
    DEFAULT_IDLE_BACKOFF,
};
use crate::source::SourceStore;
use crate::tape::{TapeDevice, TapeUnit};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The mutex serializing every use of the library's robotic arm.
pub type ArmLock = Arc<Mutex<()>>;

/// Cartridge swap for one pool, always inside the arm critical section.
///
/// On failure at any step the catalog already reflects the motions that
/// completed, so an operator can recover the library by inspection.
pub struct TapeExchanger {
    catalog: Arc<dyn CatalogStore>,
    changer: Arc<dyn Changer>,
    tape: SharedTape,
    arm: ArmLock,
    pool_id: i64,
    device_path: String,
}

#[async_trait]
impl TapeSwapper for TapeExchanger {
    async fn change_tape(&self) -> Result<i64, PipelineError> {
        // Hold the arm across close → unload → load → reopen → retension.
        let _arm = self.arm.lock().await;
        info!(pool = self.pool_id, "changing tape");

        let fresh = self
            .catalog
            .next_tape_in_pool(self.pool_id)
            .await?
            .ok_or(PipelineError::PoolExhausted(self.pool_id))?;

        let drive = self.catalog.tape_in_storage(&self.device_path).await?;
        let outgoing = drive
            .tape_id
            .ok_or(PipelineError::DriveEmpty(self.pool_id))?;

        with_tape(&self.tape, |tape| tape.close()).await?;

        let empty_slot = self.changer.find_empty_slot().await?;

        // Outgoing cartridge to the empty slot; it leaves the drive full.
        self.changer.unload(drive.drive_number, empty_slot).await?;
        self.catalog
            .update_tape_row(empty_slot, true, false, outgoing)
            .await?;
        self.catalog
            .update_storage_tape(None, &self.device_path)
            .await?;

        // Fresh cartridge into the drive.
        self.changer.load(drive.drive_number, fresh.slot).await?;
        with_tape(&self.tape, |tape| tape.reopen()).await?;
        self.catalog
            .update_tape_row(0, false, false, fresh.tape_id)
            .await?;
        self.catalog
            .update_storage_tape(Some(fresh.tape_id), &self.device_path)
            .await?;

        // Re-tension so the drive's position and counters are authoritative
        // before the next File row takes an ordinal from them.
        with_tape(&self.tape, |tape| tape.retension()).await?;
        let mark = with_tape(&self.tape, |tape| tape.file_mark_number()).await?;

        info!(
            pool = self.pool_id,
            out = outgoing,
            now = fresh.tape_id,
            file_mark = mark,
            "tape changed"
        );
        Ok(fresh.tape_id)
    }
}

/// One pool's backup pipeline: its catalog view, source client, tape drive,
/// changer access and run lock.
pub struct BackupPipeline {
    catalog: Arc<dyn CatalogStore>,
    source: Arc<dyn SourceStore>,
    changer: Arc<dyn Changer>,
    tape: SharedTape,
    pool_id: i64,
    device_path: String,
    size_cap_bytes: u64,
    arm: ArmLock,
    run_lock: Mutex<()>,
    failed: AtomicBool,
    cancel: CancellationToken,
}

impl BackupPipeline {
    /// Resolve the pool's drive from the catalog and open it.
    pub async fn initialize(
        catalog: Arc<dyn CatalogStore>,
        source: Arc<dyn SourceStore>,
        changer: Arc<dyn Changer>,
        config: &ConfigFile,
        pool_id: i64,
        arm: ArmLock,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let device_path = catalog.storage_for_pool(pool_id).await?;
        let device = TapeDevice::open(&device_path, config.tape.record_size)?;
        let tape: SharedTape = Arc::new(std::sync::Mutex::new(
            Box::new(device) as Box<dyn TapeUnit>
        ));
        Ok(Self::assemble(
            catalog,
            source,
            changer,
            tape,
            pool_id,
            device_path,
            config.tape.size_cap_bytes,
            arm,
            cancel,
        ))
    }

    /// Wire a pipeline from already-built parts.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        catalog: Arc<dyn CatalogStore>,
        source: Arc<dyn SourceStore>,
        changer: Arc<dyn Changer>,
        tape: SharedTape,
        pool_id: i64,
        device_path: String,
        size_cap_bytes: u64,
        arm: ArmLock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            source,
            changer,
            tape,
            pool_id,
            device_path,
            size_cap_bytes,
            arm,
            run_lock: Mutex::new(()),
            failed: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn pool_id(&self) -> i64 {
        self.pool_id
    }

    /// True once a firing ended in a hard error; the pipeline then stops
    /// taking work until the operator intervenes.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// One firing of this pipeline: walk `root` for `schedule_class` while
    /// draining the resulting jobs to tape.
    ///
    /// If a previous firing still holds the run lock, this one is skipped
    /// (not queued). Errors other than the interrupt sentinel quarantine the
    /// mounted tape with the error text and latch the failed flag.
    pub async fn run_once(&self, root: &str, schedule_class: &str) -> Result<(), PipelineError> {
        let Ok(_run) = self.run_lock.try_lock() else {
            debug!(pool = self.pool_id, "previous firing still running, skipped");
            return Ok(());
        };
        if self.cancel.is_cancelled() || self.has_failed() {
            return Ok(());
        }

        info!(pool = self.pool_id, root, schedule_class, "firing");

        let (done_tx, done_rx) = oneshot::channel();
        let (err_tx, err_rx) = watch::channel(None::<String>);

        let producer = Producer::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.source),
            self.pool_id,
            self.cancel.clone(),
        );
        let walk_root = root.to_string();
        let walk_class = schedule_class.to_string();
        let walk = tokio::spawn(async move {
            let result = producer.run(&walk_root, &walk_class, err_rx).await;
            let _ = done_tx.send(result);
        });

        let swapper: Arc<dyn TapeSwapper> = Arc::new(TapeExchanger {
            catalog: Arc::clone(&self.catalog),
            changer: Arc::clone(&self.changer),
            tape: Arc::clone(&self.tape),
            arm: Arc::clone(&self.arm),
            pool_id: self.pool_id,
            device_path: self.device_path.clone(),
        });
        let consumer = Consumer::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.source),
            Arc::clone(&self.tape),
            swapper,
            ConsumerConfig {
                pool_id: self.pool_id,
                device_path: self.device_path.clone(),
                size_cap_bytes: self.size_cap_bytes,
                idle_backoff: DEFAULT_IDLE_BACKOFF,
            },
            self.cancel.clone(),
        );

        let result = consumer.run(done_rx).await;

        if let Err(err) = &result {
            // Stop the walk promptly; it checks this at every entry.
            let _ = err_tx.send(Some(err.to_string()));
        }
        let _ = walk.await;

        if let Err(err) = &result {
            if err.is_interrupt() {
                info!(pool = self.pool_id, "firing interrupted");
            } else {
                error!(pool = self.pool_id, error = %err, "firing failed");
                self.failed.store(true, Ordering::SeqCst);
                if let Err(record_err) = self
                    .catalog
                    .record_tape_error(self.pool_id, &err.to_string())
                    .await
                {
                    warn!(pool = self.pool_id, error = %record_err, "could not quarantine tape");
                }
            }
        }
        result
    }

    /// Move every In-Progress job of this pool to Interrupted and close the
    /// drive. Called by the orchestrator once the consumer has exited.
    pub async fn shutdown(&self) {
        if let Err(err) = self.catalog.interrupt_open_jobs(self.pool_id).await {
            warn!(pool = self.pool_id, error = %err, "could not interrupt open jobs");
        }
        if let Err(err) = with_tape(&self.tape, |tape| tape.close()).await {
            warn!(pool = self.pool_id, error = %err, "could not close tape device");
        }
    }
}

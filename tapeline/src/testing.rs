//! Shared in-memory fakes for pipeline tests.
//!
//! The fakes sit behind the same seams the real adapters implement
//! ([`CatalogStore`], [`TapeUnit`], [`Changer`]), so pipeline and pair tests
//! exercise the production control flow end to end with no hardware or
//! database.

use crate::catalog::{
    CatalogError, CatalogStore, DriveStatus, JobRow, JobState, PathSpecRow, SlotTape,
};
use crate::changer::{Changer, ChangerError, SlotStatus};
use crate::tape::{ustar_header, TapeError, TapeUnit, TarEntry, TAR_BLOCK_SIZE, TAR_FOOTER_SIZE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Catalog fake
// =============================================================================

#[derive(Debug, Clone)]
pub struct TapeRecord {
    pub id: i64,
    pub name: String,
    pub pool_id: i64,
    pub slot: i64,
    pub is_full: bool,
    pub error_in_tape: bool,
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageRecord {
    pub device_path: String,
    pub drive_number: i64,
    pub tape_id: Option<i64>,
    pub pool_id: i64,
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub job_id: i64,
    pub tape_id: i64,
    pub file_mark: i64,
}

#[derive(Debug, Default)]
struct CatalogState {
    next_id: i64,
    path_specs: Vec<(i64, String, String)>,
    jobs: Vec<JobRow>,
    job_tape_maps: Vec<(String, i64, i64)>,
    files: Vec<FileRecord>,
    tapes: Vec<TapeRecord>,
    storages: Vec<StorageRecord>,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory catalog with the same observable semantics as the SQL gateway.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Provision a pool with its drive.
    pub fn seed_pool(&self, pool_id: i64, device_path: &str, drive_number: i64) {
        let mut state = self.state.lock().unwrap();
        state.storages.push(StorageRecord {
            device_path: device_path.to_string(),
            drive_number,
            tape_id: None,
            pool_id,
        });
    }

    /// Provision a cartridge; slot 0 means "in the drive", in which case the
    /// pool's Storage row is pointed at it. Returns the tape id.
    pub fn seed_tape(&self, name: &str, pool_id: i64, slot: i64) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.tapes.push(TapeRecord {
            id,
            name: name.to_string(),
            pool_id,
            slot,
            is_full: false,
            error_in_tape: false,
            error_reason: None,
        });
        if slot == 0 {
            if let Some(storage) = state.storages.iter_mut().find(|s| s.pool_id == pool_id) {
                storage.tape_id = Some(id);
            }
        }
        id
    }

    /// Enrol a directory into a schedule class ahead of a walk.
    pub fn seed_path_spec(&self, path: &str, schedule: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.path_specs.push((id, path.to_string(), schedule.to_string()));
    }

    pub fn jobs(&self) -> Vec<JobRow> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.state.lock().unwrap().files.clone()
    }

    pub fn job_tape_maps(&self) -> Vec<(String, i64, i64)> {
        self.state.lock().unwrap().job_tape_maps.clone()
    }

    pub fn tapes(&self) -> Vec<TapeRecord> {
        self.state.lock().unwrap().tapes.clone()
    }

    pub fn storages(&self) -> Vec<StorageRecord> {
        self.state.lock().unwrap().storages.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_or_insert_path_spec(
        &self,
        path: &str,
        schedule_class: &str,
    ) -> Result<PathSpecRow, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if let Some((id, _, schedule)) = state.path_specs.iter().find(|(_, p, _)| p == path) {
            return Ok(PathSpecRow {
                id: *id,
                schedule: schedule.clone(),
            });
        }
        let id = state.next_id();
        state
            .path_specs
            .push((id, path.to_string(), schedule_class.to_string()));
        Ok(PathSpecRow {
            id,
            schedule: schedule_class.to_string(),
        })
    }

    async fn job_exists(&self, path: &str, pool_id: i64) -> Result<bool, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.iter().any(|job| {
            job.name == path
                && job.pool_id == pool_id
                && matches!(job.state, JobState::Initialized | JobState::InProgress)
        }))
    }

    async fn insert_job(
        &self,
        path: &str,
        pool_id: i64,
        path_spec_id: i64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.jobs.push(JobRow {
            id,
            name: path.to_string(),
            start_time: None,
            duration_minutes: None,
            file_count: None,
            state: JobState::Initialized,
            pool_id,
            path_spec_id,
        });
        Ok(())
    }

    async fn claim_next_job(
        &self,
        pool_id: i64,
        claim_time: DateTime<Utc>,
    ) -> Result<Option<JobRow>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .iter_mut()
            .filter(|job| job.pool_id == pool_id && job.state == JobState::Initialized)
            .min_by_key(|job| job.id);
        Ok(job.map(|job| {
            job.state = JobState::InProgress;
            job.start_time = Some(claim_time);
            job.clone()
        }))
    }

    async fn update_job_final(
        &self,
        job: &JobRow,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
        file_count: i64,
        state: JobState,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.lock().unwrap();
        if let Some(row) = guard
            .jobs
            .iter_mut()
            .find(|row| row.id == job.id && row.name == job.name && row.pool_id == job.pool_id)
        {
            row.start_time = Some(start_time);
            row.duration_minutes = Some(duration_minutes);
            row.file_count = Some(file_count);
            row.state = state;
        }
        Ok(())
    }

    async fn map_job_to_tape(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.job_tape_maps.push((path.to_string(), job_id, tape_id));
        Ok(())
    }

    async fn record_file(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
        file_mark: i64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.files.push(FileRecord {
            path: path.to_string(),
            job_id,
            tape_id,
            file_mark,
        });
        Ok(())
    }

    async fn last_completed_start(
        &self,
        path: &str,
        pool_id: i64,
    ) -> Result<DateTime<Utc>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|job| {
                job.name == path && job.pool_id == pool_id && job.state == JobState::Complete
            })
            .filter_map(|job| job.start_time)
            .max()
            .unwrap_or_else(crate::time::never_backed_up))
    }

    async fn storage_for_pool(&self, pool_id: i64) -> Result<String, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .storages
            .iter()
            .find(|storage| storage.pool_id == pool_id)
            .map(|storage| storage.device_path.clone())
            .ok_or(CatalogError::StorageNotProvisioned(pool_id))
    }

    async fn tape_in_storage(&self, device_path: &str) -> Result<DriveStatus, CatalogError> {
        let state = self.state.lock().unwrap();
        state
            .storages
            .iter()
            .find(|storage| storage.device_path == device_path)
            .map(|storage| DriveStatus {
                drive_number: storage.drive_number,
                tape_id: storage.tape_id,
            })
            .ok_or(CatalogError::Query {
                op: "tape_in_storage",
                source: sqlx::Error::RowNotFound,
            })
    }

    async fn next_tape_in_pool(&self, pool_id: i64) -> Result<Option<SlotTape>, CatalogError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tapes
            .iter()
            .filter(|tape| {
                tape.pool_id == pool_id && tape.slot != 0 && !tape.is_full && !tape.error_in_tape
            })
            .min_by(|a, b| a.name.cmp(&b.name))
            .map(|tape| SlotTape {
                slot: tape.slot,
                tape_id: tape.id,
            }))
    }

    async fn update_tape_row(
        &self,
        slot: i64,
        is_full: bool,
        error_in_tape: bool,
        tape_id: i64,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        if let Some(tape) = state.tapes.iter_mut().find(|tape| tape.id == tape_id) {
            tape.slot = slot;
            tape.is_full = is_full;
            tape.error_in_tape = error_in_tape;
        }
        Ok(())
    }

    async fn update_storage_tape(
        &self,
        tape_id: Option<i64>,
        device_path: &str,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        if let Some(storage) = state
            .storages
            .iter_mut()
            .find(|storage| storage.device_path == device_path)
        {
            storage.tape_id = tape_id;
        }
        Ok(())
    }

    async fn interrupt_open_jobs(&self, pool_id: i64) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        for job in &mut state.jobs {
            if job.pool_id == pool_id && job.state == JobState::InProgress {
                job.state = JobState::Interrupted;
            }
        }
        Ok(())
    }

    async fn record_tape_error(&self, pool_id: i64, reason: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        let tape_id = state
            .storages
            .iter()
            .find(|storage| storage.pool_id == pool_id)
            .and_then(|storage| storage.tape_id)
            .ok_or(CatalogError::Query {
                op: "record_tape_error",
                source: sqlx::Error::RowNotFound,
            })?;
        if let Some(tape) = state.tapes.iter_mut().find(|tape| tape.id == tape_id) {
            tape.error_in_tape = true;
            tape.error_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn find_pair(&self, pool_id: i64) -> Result<i64, CatalogError> {
        let state = self.state.lock().unwrap();
        let own = state
            .tapes
            .iter()
            .filter(|tape| tape.pool_id == pool_id)
            .min_by(|a, b| a.name.cmp(&b.name))
            .ok_or(CatalogError::Query {
                op: "find_pair",
                source: sqlx::Error::RowNotFound,
            })?;
        state
            .tapes
            .iter()
            .filter(|tape| tape.pool_id != pool_id)
            .find(|tape| {
                tape.name.len() == own.name.len()
                    && tape
                        .name
                        .bytes()
                        .zip(own.name.bytes())
                        .enumerate()
                        .all(|(idx, (a, b))| idx == 2 || a == b)
            })
            .map(|tape| tape.pool_id)
            .ok_or(CatalogError::Query {
                op: "find_pair",
                source: sqlx::Error::RowNotFound,
            })
    }
}

// =============================================================================
// Tape fake
// =============================================================================

/// State shared between a [`MemoryTape`] handle and the test's assertions.
#[derive(Debug)]
pub struct MediaState {
    /// One byte vector per cartridge generation; `reopen` after a swap
    /// starts a fresh one.
    pub cartridges: Vec<Vec<u8>>,
    /// Per-cartridge byte capacity.
    pub capacity: usize,
    /// File marks written on the current cartridge.
    pub marks: i64,
    pub closed: bool,
}

/// In-memory tape drive with the same framing as the real device.
pub struct MemoryTape {
    media: Arc<Mutex<MediaState>>,
    record_size: usize,
}

impl MemoryTape {
    pub fn new(capacity: usize, record_size: usize) -> (Self, Arc<Mutex<MediaState>>) {
        let media = Arc::new(Mutex::new(MediaState {
            cartridges: vec![Vec::new()],
            capacity,
            marks: 0,
            closed: false,
        }));
        (
            Self {
                media: Arc::clone(&media),
                record_size,
            },
            media,
        )
    }
}

impl TapeUnit for MemoryTape {
    fn write_file(&mut self, entry: &TarEntry, reader: &mut dyn Read) -> Result<(), TapeError> {
        let mut media = self.media.lock().unwrap();
        if media.closed {
            return Err(TapeError::Closed);
        }

        let mut payload = Vec::new();
        reader
            .read_to_end(&mut payload)
            .map_err(TapeError::SourceRead)?;
        if payload.len() as u64 != entry.size {
            return Err(TapeError::ShortRead {
                path: entry.path.clone(),
                expected: entry.size,
                actual: payload.len() as u64,
            });
        }

        let mut framed = ustar_header(entry)?.to_vec();
        framed.extend_from_slice(&payload);
        let pad = (TAR_BLOCK_SIZE - framed.len() % TAR_BLOCK_SIZE) % TAR_BLOCK_SIZE;
        framed.resize(framed.len() + pad + TAR_FOOTER_SIZE, 0);
        let fill = (self.record_size - framed.len() % self.record_size) % self.record_size;
        framed.resize(framed.len() + fill, 0);

        let capacity = media.capacity;
        let cartridge = media.cartridges.last_mut().expect("one cartridge loaded");
        if cartridge.len() + framed.len() > capacity {
            return Err(TapeError::EndOfMedia);
        }
        cartridge.extend_from_slice(&framed);
        Ok(())
    }

    fn write_file_mark(&mut self) -> Result<(), TapeError> {
        let mut media = self.media.lock().unwrap();
        if media.closed {
            return Err(TapeError::Closed);
        }
        media.marks += 1;
        Ok(())
    }

    fn jump_to_end_of_media(&mut self) -> Result<(), TapeError> {
        Ok(())
    }

    fn file_mark_number(&mut self) -> Result<i64, TapeError> {
        // Marks passed so far, matching the drive's 0-based mt_fileno.
        Ok(self.media.lock().unwrap().marks)
    }

    fn retension(&mut self) -> Result<(), TapeError> {
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), TapeError> {
        let mut media = self.media.lock().unwrap();
        media.closed = false;
        media.cartridges.push(Vec::new());
        media.marks = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TapeError> {
        self.media.lock().unwrap().closed = true;
        Ok(())
    }
}

// =============================================================================
// Source fake
// =============================================================================

/// Wraps a source and delays every listing, keeping a walk in flight long
/// enough for interrupt tests to land mid-run.
pub struct DelayedSource<S> {
    inner: S,
    delay: std::time::Duration,
}

impl<S> DelayedSource<S> {
    pub fn new(inner: S, delay: std::time::Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: crate::source::SourceStore> crate::source::SourceStore for DelayedSource<S> {
    async fn read_dir(
        &self,
        path: &str,
    ) -> Result<Vec<crate::source::SourceEntry>, crate::source::SourceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_dir(path).await
    }

    async fn open(
        &self,
        path: &str,
    ) -> Result<Box<dyn Read + Send>, crate::source::SourceError> {
        self.inner.open(path).await
    }
}

// =============================================================================
// Changer fake
// =============================================================================

#[derive(Debug, Default)]
pub struct LibraryState {
    /// (slot, cartridge label) pairs; `None` label means empty.
    pub slots: Vec<(i64, Option<String>)>,
    /// Operation log for serialization assertions.
    pub log: Vec<String>,
}

/// In-memory changer that detects overlapping arm use.
pub struct MemoryChanger {
    state: Mutex<LibraryState>,
    busy: AtomicBool,
    pub overlaps: AtomicU32,
}

impl MemoryChanger {
    pub fn new(slots: Vec<(i64, Option<String>)>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LibraryState {
                slots,
                log: Vec::new(),
            }),
            busy: AtomicBool::new(false),
            overlaps: AtomicU32::new(0),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Mark the arm busy for the duration of one operation; overlapping
    /// entries mean the arm mutex was not held.
    async fn arm_motion(&self, op: String) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.state.lock().unwrap().log.push(op);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Changer for MemoryChanger {
    async fn unload(&self, drive: i64, to_slot: i64) -> Result<(), ChangerError> {
        self.arm_motion(format!("unload drive={} slot={}", drive, to_slot))
            .await;
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.iter_mut().find(|(number, _)| *number == to_slot) {
            slot.1 = Some(format!("from-drive-{}", drive));
        }
        Ok(())
    }

    async fn load(&self, drive: i64, from_slot: i64) -> Result<(), ChangerError> {
        self.arm_motion(format!("load drive={} slot={}", drive, from_slot))
            .await;
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state
            .slots
            .iter_mut()
            .find(|(number, _)| *number == from_slot)
        {
            slot.1 = None;
        }
        Ok(())
    }

    async fn status(&self) -> Result<Vec<SlotStatus>, ChangerError> {
        self.arm_motion("status".to_string()).await;
        let state = self.state.lock().unwrap();
        Ok(state
            .slots
            .iter()
            .map(|(slot, cartridge)| SlotStatus {
                slot: *slot,
                cartridge: cartridge.clone(),
            })
            .collect())
    }
}

//! PostgreSQL implementation of the catalog gateway.

use super::error::CatalogError;
use super::models::{DriveStatus, JobRow, JobState, PathSpecRow, SlotTape};
use super::CatalogStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::path::Path;
use tracing::info;

/// DDL applied by [`PgCatalog::ensure_schema`].
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// PostgreSQL error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Catalog gateway backed by a PostgreSQL connection pool.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connect using a single-line credentials file (`<user> <password> <dbname>`).
    pub async fn connect(
        auth_file: &Path,
        host: &str,
        port: u16,
    ) -> Result<Self, CatalogError> {
        let contents =
            std::fs::read_to_string(auth_file).map_err(|source| CatalogError::AuthFileRead {
                path: auth_file.display().to_string(),
                source,
            })?;
        let (user, password, dbname) =
            parse_auth_line(&contents).ok_or_else(|| CatalogError::AuthFileMalformed {
                path: auth_file.display().to_string(),
            })?;

        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(user)
            .password(password)
            .database(dbname);

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(CatalogError::Connect)?;

        info!(host, port, dbname, "connected to catalog database");
        Ok(Self { pool })
    }

    /// Build a gateway over an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled DDL (idempotent `CREATE TABLE IF NOT EXISTS`).
    pub async fn ensure_schema(&self) -> Result<(), CatalogError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("ensure_schema"))?;
        Ok(())
    }

    /// Close the underlying pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Parse the single credentials line: `<user> <password> <dbname>`.
fn parse_auth_line(contents: &str) -> Option<(&str, &str, &str)> {
    let mut fields = contents.split_whitespace();
    let user = fields.next()?;
    let password = fields.next()?;
    let dbname = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    Some((user, password, dbname))
}

/// Derive the LIKE pattern matching the paired pool's tape names.
///
/// The third character of a tape name encodes the physical location
/// (e.g. `STA000L7` / `STB000L7`); patching it with the SQL wildcard
/// yields the sibling's name pattern.
pub fn sibling_name_pattern(tape_name: &str) -> Option<String> {
    if tape_name.len() < 3 || !tape_name.is_char_boundary(2) || !tape_name.is_char_boundary(3) {
        return None;
    }
    Some(format!("{}_{}", &tape_name[..2], &tape_name[3..]))
}

fn job_from_row(row: &PgRow) -> Result<JobRow, CatalogError> {
    fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, CatalogError>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get(column)
            .map_err(CatalogError::query("decode_job_row"))
    }

    let state: String = get(row, "state")?;
    Ok(JobRow {
        id: get(row, "id")?,
        name: get(row, "name")?,
        start_time: get(row, "starttime")?,
        duration_minutes: get(row, "durationinminutes")?,
        file_count: get(row, "numoffiles")?,
        state: JobState::parse(&state)?,
        pool_id: get(row, "poolid")?,
        path_spec_id: get(row, "pathspecid")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn get_or_insert_path_spec(
        &self,
        path: &str,
        schedule_class: &str,
    ) -> Result<PathSpecRow, CatalogError> {
        let existing = sqlx::query("SELECT id, schedule FROM PathSpec WHERE name=$1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(CatalogError::query("get_path_spec"))?;

        if let Some(row) = existing {
            return Ok(PathSpecRow {
                id: row.try_get("id").map_err(CatalogError::query("get_path_spec"))?,
                schedule: row
                    .try_get("schedule")
                    .map_err(CatalogError::query("get_path_spec"))?,
            });
        }

        let inserted = sqlx::query("INSERT INTO PathSpec VALUES (DEFAULT, $1, $2)")
            .bind(path)
            .bind(schedule_class)
            .execute(&self.pool)
            .await;
        if let Err(err) = inserted {
            // Concurrent insert of the same path; fall through to re-read.
            if !is_unique_violation(&err) {
                return Err(CatalogError::Query {
                    op: "add_path_spec",
                    source: err,
                });
            }
        }

        let row = sqlx::query("SELECT id, schedule FROM PathSpec WHERE name=$1")
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .map_err(CatalogError::query("reread_path_spec"))?;
        Ok(PathSpecRow {
            id: row
                .try_get("id")
                .map_err(CatalogError::query("reread_path_spec"))?,
            schedule: row
                .try_get("schedule")
                .map_err(CatalogError::query("reread_path_spec"))?,
        })
    }

    async fn job_exists(&self, path: &str, pool_id: i64) -> Result<bool, CatalogError> {
        let row = sqlx::query(
            "SELECT name FROM Job WHERE name=$1 AND poolid=$2 AND (state=$3 OR state=$4) LIMIT 1",
        )
        .bind(path)
        .bind(pool_id)
        .bind(JobState::Initialized.as_str())
        .bind(JobState::InProgress.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(CatalogError::query("job_exists"))?;
        Ok(row.is_some())
    }

    async fn insert_job(
        &self,
        path: &str,
        pool_id: i64,
        path_spec_id: i64,
    ) -> Result<(), CatalogError> {
        sqlx::query("INSERT INTO Job(id, name, state, poolid, pathspecid) VALUES (DEFAULT, $1, $2, $3, $4)")
            .bind(path)
            .bind(JobState::Initialized.as_str())
            .bind(pool_id)
            .bind(path_spec_id)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("insert_job"))?;
        Ok(())
    }

    async fn claim_next_job(
        &self,
        pool_id: i64,
        claim_time: DateTime<Utc>,
    ) -> Result<Option<JobRow>, CatalogError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(CatalogError::query("claim_next_job"))?;

        let row = sqlx::query(
            "SELECT id, name, starttime, durationinminutes, numoffiles, state, poolid, pathspecid \
             FROM Job WHERE state=$1 AND poolid=$2 ORDER BY id LIMIT 1 FOR UPDATE",
        )
        .bind(JobState::Initialized.as_str())
        .bind(pool_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(CatalogError::query("claim_next_job"))?;

        let Some(row) = row else {
            tx.commit()
                .await
                .map_err(CatalogError::query("claim_next_job"))?;
            return Ok(None);
        };

        let job = job_from_row(&row)?;
        sqlx::query("UPDATE Job SET starttime=$2, state=$3 WHERE id=$1")
            .bind(job.id)
            .bind(claim_time)
            .bind(JobState::InProgress.as_str())
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::query("claim_next_job"))?;
        tx.commit()
            .await
            .map_err(CatalogError::query("claim_next_job"))?;

        Ok(Some(JobRow {
            start_time: Some(claim_time),
            state: JobState::InProgress,
            ..job
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
        sqlx::query(
            "UPDATE Job SET starttime=$3, durationinminutes=$4, numoffiles=$5, state=$6 \
             WHERE id=$1 AND name=$2 AND poolid=$7",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(start_time)
        .bind(duration_minutes)
        .bind(file_count)
        .bind(state.as_str())
        .bind(job.pool_id)
        .execute(&self.pool)
        .await
        .map_err(CatalogError::query("update_job_final"))?;
        Ok(())
    }

    async fn map_job_to_tape(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
    ) -> Result<(), CatalogError> {
        sqlx::query("INSERT INTO JobTapeMap VALUES(DEFAULT, $1, $2, $3)")
            .bind(path)
            .bind(job_id)
            .bind(tape_id)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("map_job_to_tape"))?;
        Ok(())
    }

    async fn record_file(
        &self,
        path: &str,
        job_id: i64,
        tape_id: i64,
        file_mark: i64,
    ) -> Result<(), CatalogError> {
        sqlx::query("INSERT INTO File VALUES(DEFAULT, $1, $2, $3, $4)")
            .bind(path)
            .bind(job_id)
            .bind(file_mark)
            .bind(tape_id)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("record_file"))?;
        Ok(())
    }

    async fn last_completed_start(
        &self,
        path: &str,
        pool_id: i64,
    ) -> Result<DateTime<Utc>, CatalogError> {
        let start: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT starttime FROM Job WHERE name=$1 AND poolid=$2 AND state=$3 \
             ORDER BY starttime DESC LIMIT 1",
        )
        .bind(path)
        .bind(pool_id)
        .bind(JobState::Complete.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(CatalogError::query("last_completed_start"))?;

        Ok(start.flatten().unwrap_or_else(crate::time::never_backed_up))
    }

    async fn storage_for_pool(&self, pool_id: i64) -> Result<String, CatalogError> {
        let path: Option<String> = sqlx::query_scalar(
            "SELECT Storage.name FROM Storage JOIN Pool ON Storage.id = Pool.storageid \
             WHERE Pool.id = $1",
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CatalogError::query("storage_for_pool"))?;

        path.ok_or(CatalogError::StorageNotProvisioned(pool_id))
    }

    async fn tape_in_storage(&self, device_path: &str) -> Result<DriveStatus, CatalogError> {
        let row = sqlx::query("SELECT drivenumber, tapeid FROM Storage WHERE name=$1")
            .bind(device_path)
            .fetch_one(&self.pool)
            .await
            .map_err(CatalogError::query("tape_in_storage"))?;
        Ok(DriveStatus {
            drive_number: row
                .try_get("drivenumber")
                .map_err(CatalogError::query("tape_in_storage"))?,
            tape_id: row
                .try_get("tapeid")
                .map_err(CatalogError::query("tape_in_storage"))?,
        })
    }

    async fn next_tape_in_pool(&self, pool_id: i64) -> Result<Option<SlotTape>, CatalogError> {
        let row = sqlx::query(
            "SELECT slotnumber, id FROM Tape \
             WHERE poolid=$1 AND slotnumber <> 0 AND isfull=false AND errorintape=false \
             ORDER BY name LIMIT 1",
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(CatalogError::query("next_tape_in_pool"))?;

        row.map(|row| {
            Ok(SlotTape {
                slot: row
                    .try_get("slotnumber")
                    .map_err(CatalogError::query("next_tape_in_pool"))?,
                tape_id: row
                    .try_get("id")
                    .map_err(CatalogError::query("next_tape_in_pool"))?,
            })
        })
        .transpose()
    }

    async fn update_tape_row(
        &self,
        slot: i64,
        is_full: bool,
        error_in_tape: bool,
        tape_id: i64,
    ) -> Result<(), CatalogError> {
        sqlx::query("UPDATE Tape SET slotnumber=$1, isfull=$2, errorintape=$3 WHERE id=$4")
            .bind(slot)
            .bind(is_full)
            .bind(error_in_tape)
            .bind(tape_id)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("update_tape_row"))?;
        Ok(())
    }

    async fn update_storage_tape(
        &self,
        tape_id: Option<i64>,
        device_path: &str,
    ) -> Result<(), CatalogError> {
        match tape_id {
            Some(tape_id) => {
                sqlx::query("UPDATE Storage SET tapeid=$1 WHERE name=$2")
                    .bind(tape_id)
                    .bind(device_path)
                    .execute(&self.pool)
                    .await
                    .map_err(CatalogError::query("update_storage_tape"))?;
            }
            None => {
                sqlx::query("UPDATE Storage SET tapeid=NULL WHERE name=$1")
                    .bind(device_path)
                    .execute(&self.pool)
                    .await
                    .map_err(CatalogError::query("clear_storage_tape"))?;
            }
        }
        Ok(())
    }

    async fn interrupt_open_jobs(&self, pool_id: i64) -> Result<(), CatalogError> {
        sqlx::query("UPDATE Job SET state=$2 WHERE poolid=$1 AND state=$3")
            .bind(pool_id)
            .bind(JobState::Interrupted.as_str())
            .bind(JobState::InProgress.as_str())
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("interrupt_open_jobs"))?;
        Ok(())
    }

    async fn record_tape_error(&self, pool_id: i64, reason: &str) -> Result<(), CatalogError> {
        let tape_id: i64 = sqlx::query_scalar(
            "SELECT Storage.tapeid FROM Pool JOIN Storage ON Storage.id=Pool.storageid \
             WHERE Pool.id=$1",
        )
        .bind(pool_id)
        .fetch_one(&self.pool)
        .await
        .map_err(CatalogError::query("record_tape_error"))?;

        sqlx::query("UPDATE Tape SET errorintape=true, errorreason=$2 WHERE id=$1")
            .bind(tape_id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("record_tape_error"))?;
        Ok(())
    }

    async fn find_pair(&self, pool_id: i64) -> Result<i64, CatalogError> {
        let tape_name: String =
            sqlx::query_scalar("SELECT name FROM Tape WHERE poolid=$1 ORDER BY name LIMIT 1")
                .bind(pool_id)
                .fetch_one(&self.pool)
                .await
                .map_err(CatalogError::query("find_pair"))?;

        let pattern = sibling_name_pattern(&tape_name).ok_or(CatalogError::Query {
            op: "find_pair",
            source: sqlx::Error::RowNotFound,
        })?;

        sqlx::query_scalar(
            "SELECT poolid FROM Tape WHERE poolid<>$1 AND name LIKE $2 ORDER BY name LIMIT 1",
        )
        .bind(pool_id)
        .bind(pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(CatalogError::query("find_pair"))
    }
}

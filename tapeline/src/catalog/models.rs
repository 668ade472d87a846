//! Row types and the job state machine.

use super::error::CatalogError;
use chrono::{DateTime, Utc};

/// Lifecycle state of a [`JobRow`].
///
/// The catalog stores these as a fixed string domain; parsing rejects
/// anything outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created by the producer, not yet claimed.
    Initialized,
    /// Claimed by a consumer; at most one per pool at any moment.
    InProgress,
    /// All eligible files written and recorded.
    Complete,
    /// Aborted on a hard error.
    Incomplete,
    /// Aborted by operator signal.
    Interrupted,
}

impl JobState {
    /// The exact string stored in the Job.state column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Initialized => "Initialized",
            JobState::InProgress => "In-Progress",
            JobState::Complete => "Complete",
            JobState::Incomplete => "InComplete",
            JobState::Interrupted => "Interrupted",
        }
    }

    /// Parse a state string from the catalog.
    pub fn parse(s: &str) -> Result<Self, CatalogError> {
        match s {
            "Initialized" => Ok(JobState::Initialized),
            "In-Progress" => Ok(JobState::InProgress),
            "Complete" => Ok(JobState::Complete),
            "InComplete" => Ok(JobState::Incomplete),
            "Interrupted" => Ok(JobState::Interrupted),
            other => Err(CatalogError::UnknownState(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup of one directory.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    /// Absolute directory path.
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub file_count: Option<i64>,
    pub state: JobState,
    pub pool_id: i64,
    pub path_spec_id: i64,
}

/// One source directory's backup enrolment.
#[derive(Debug, Clone)]
pub struct PathSpecRow {
    pub id: i64,
    /// Schedule class label, e.g. "Hourly".
    pub schedule: String,
}

/// Resolution of a drive device path to its changer index and mounted tape.
#[derive(Debug, Clone, Copy)]
pub struct DriveStatus {
    /// Index the media changer addresses this drive by.
    pub drive_number: i64,
    /// Currently mounted tape id; `None` means the drive is empty.
    pub tape_id: Option<i64>,
}

/// A cartridge sitting in a library slot, ready to be loaded.
#[derive(Debug, Clone, Copy)]
pub struct SlotTape {
    pub slot: i64,
    pub tape_id: i64,
}

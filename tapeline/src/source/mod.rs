//! Source filesystem interface - the directory-walk and file-read seam.
//!
//! The backup pipeline only needs two operations from the source tree:
//! list a directory's direct children with their metadata, and open a file
//! for streaming. [`SourceStore`] captures that seam; the HDFS client proper
//! is an external collaborator that plugs in behind it. [`LocalSource`]
//! adapts a local directory tree, which is also what the pipeline tests
//! drive.

mod local;

pub use local::LocalSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Read;
use thiserror::Error;

/// Errors surfaced by source filesystem operations.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Listing a directory failed
    #[error("failed to list source directory '{path}': {source}")]
    ReadDir {
        path: String,
        source: std::io::Error,
    },

    /// Opening a file for read failed
    #[error("failed to open source file '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    /// Reading entry metadata failed
    #[error("failed to stat source entry '{path}': {source}")]
    Metadata {
        path: String,
        source: std::io::Error,
    },
}

/// One directory entry with the metadata the incremental policy needs.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Full path of the entry.
    pub path: String,
    /// Payload size in bytes; zero for directories.
    pub size: u64,
    /// Unix permission bits.
    pub mode: u32,
    /// Modification time, compared against the last completed backup.
    pub mtime: DateTime<Utc>,
    pub is_dir: bool,
}

/// Directory-walk and file-read operations over the source tree.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Direct children of a directory, sorted by name.
    async fn read_dir(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError>;

    /// Open a file for streaming. The reader is consumed inside
    /// `spawn_blocking` by the tape writer.
    async fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, SourceError>;
}

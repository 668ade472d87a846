//! Tape device handle - record-aligned writes to a character-special drive.
//!
//! A tape drive is a serial device with non-seekable semantics: every write
//! issued to the kernel must be a whole multiple of the drive's record size,
//! and files are delimited by file marks rather than offsets. This module
//! owns that discipline so the rest of the pipeline can think in terms of
//! "write this file, then a mark".
//!
//! # On-tape format
//!
//! Each source file becomes one single-entry tar archive: a ustar header,
//! the payload, padding to the 512-byte tar block boundary, the mandatory
//! 1024 zero bytes of tar footer, then zero-fill to the next record
//! boundary. One file mark follows each archive; the drive's file-number
//! counter names the archive's position for the catalog.

mod device;
mod mtio;
mod ustar;

pub use device::TapeDevice;
pub use ustar::{ustar_header, TAR_BLOCK_SIZE, TAR_FOOTER_SIZE};

use chrono::{DateTime, Utc};
use std::io::Read;
use thiserror::Error;

/// Errors surfaced by tape operations.
#[derive(Debug, Error)]
pub enum TapeError {
    /// The drive reported end of media on a record write. This is the only
    /// retryable failure: the consumer swaps cartridges and rewrites the
    /// interrupted file from the start.
    #[error("no space left on device")]
    EndOfMedia,

    /// Opening the device failed
    #[error("failed to open tape device '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    /// A device write or ioctl failed
    #[error("tape {op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the source stream failed mid-copy
    #[error("source read failed while writing to tape: {0}")]
    SourceRead(#[source] std::io::Error),

    /// The source delivered fewer bytes than its header declared
    #[error("short read for '{path}': header says {expected} bytes, source delivered {actual}")]
    ShortRead {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// The path does not fit the ustar name/prefix fields
    #[error("path too long for ustar header: '{0}'")]
    PathTooLong(String),

    /// Operation on a device handle that has been closed
    #[error("tape device is closed")]
    Closed,
}

impl TapeError {
    /// Classify an I/O error from a record write; ENOSPC becomes the
    /// retryable [`TapeError::EndOfMedia`].
    pub(crate) fn from_write(source: std::io::Error) -> Self {
        if source.raw_os_error() == Some(libc::ENOSPC) {
            TapeError::EndOfMedia
        } else {
            TapeError::Io {
                op: "write",
                source,
            }
        }
    }
}

/// Metadata for one file headed to tape.
#[derive(Debug, Clone)]
pub struct TarEntry {
    /// Full source path, stored verbatim as the tar entry name.
    pub path: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Unix permission bits.
    pub mode: u32,
    /// Source modification time.
    pub mtime: DateTime<Utc>,
}

/// One open tape drive.
///
/// Implemented by [`TapeDevice`] for real hardware. All methods block in the
/// kernel; the consumer drives them through `spawn_blocking`.
pub trait TapeUnit: Send {
    /// Write one file as a single-entry tar archive, leaving the device
    /// record-aligned. On [`TapeError::EndOfMedia`] nothing useful is on the
    /// current cartridge for this file; the caller swaps and rewrites.
    fn write_file(&mut self, entry: &TarEntry, reader: &mut dyn Read) -> Result<(), TapeError>;

    /// Issue the drive's "write end-of-file" operation, advancing the
    /// file-mark counter by one.
    fn write_file_mark(&mut self) -> Result<(), TapeError>;

    /// Space to end of media so the run appends rather than overwrites.
    fn jump_to_end_of_media(&mut self) -> Result<(), TapeError>;

    /// Drive-reported file number; the ordinal stored in the File row
    /// recorded just before the terminating file mark.
    fn file_mark_number(&mut self) -> Result<i64, TapeError>;

    /// Rewind/re-tension after a cartridge swap so the drive's counters and
    /// position are authoritative.
    fn retension(&mut self) -> Result<(), TapeError>;

    /// Close and re-open the same device path, rebuilding both buffers.
    /// Used after a cartridge swap.
    fn reopen(&mut self) -> Result<(), TapeError>;

    /// Close the underlying descriptor.
    fn close(&mut self) -> Result<(), TapeError>;
}

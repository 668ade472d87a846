//! The open drive handle and its stacked write buffers.

use super::mtio::{self, TapeOp};
use super::ustar::{ustar_header, TAR_BLOCK_SIZE, TAR_FOOTER_SIZE};
use super::{TapeError, TapeUnit, TarEntry};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// How many records the outer (tar framing) buffer holds before it drains
/// into the record buffer.
const OUTER_RECORDS: usize = 8;

const ZEROS: [u8; TAR_FOOTER_SIZE] = [0u8; TAR_FOOTER_SIZE];

/// An open tape drive with two stacked write buffers.
///
/// The outer buffer accumulates tar framing; the inner buffer holds exactly
/// one record and is the only thing ever handed to the kernel, so every
/// `write(2)` the drive sees is a whole multiple of the record size.
pub struct TapeDevice {
    path: String,
    record_size: usize,
    file: Option<File>,
    outer: Vec<u8>,
    inner: Vec<u8>,
}

impl TapeDevice {
    /// Open the drive device read-write and build the buffer stack.
    pub fn open(path: &str, record_size: usize) -> Result<Self, TapeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TapeError::Open {
                path: path.to_string(),
                source,
            })?;
        debug!(path, record_size, "opened tape device");
        Ok(Self {
            path: path.to_string(),
            record_size,
            file: Some(file),
            outer: Vec::with_capacity(record_size * OUTER_RECORDS),
            inner: Vec::with_capacity(record_size),
        })
    }

    /// Device path this handle was opened against.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn fd(&self) -> Result<RawFd, TapeError> {
        Ok(self.file.as_ref().ok_or(TapeError::Closed)?.as_raw_fd())
    }

    /// Append bytes to the outer buffer, draining when it fills.
    fn emit(&mut self, bytes: &[u8]) -> Result<(), TapeError> {
        self.outer.extend_from_slice(bytes);
        if self.outer.len() >= self.record_size * OUTER_RECORDS {
            self.drain_outer()?;
        }
        Ok(())
    }

    /// Move the outer buffer's contents into the record buffer, writing
    /// every completed record to the device.
    fn drain_outer(&mut self) -> Result<(), TapeError> {
        let mut data = std::mem::take(&mut self.outer);
        let mut offset = 0;
        while offset < data.len() {
            let take = (self.record_size - self.inner.len()).min(data.len() - offset);
            self.inner.extend_from_slice(&data[offset..offset + take]);
            offset += take;
            if self.inner.len() == self.record_size {
                self.write_record()?;
            }
        }
        data.clear();
        self.outer = data;
        Ok(())
    }

    fn write_record(&mut self) -> Result<(), TapeError> {
        let file = self.file.as_mut().ok_or(TapeError::Closed)?;
        file.write_all(&self.inner).map_err(TapeError::from_write)?;
        self.inner.clear();
        Ok(())
    }

    /// Flush outer then inner. Only valid once the stream has been
    /// zero-filled to a record boundary, which `write_file` guarantees.
    fn flush_buffers(&mut self) -> Result<(), TapeError> {
        self.drain_outer()?;
        debug_assert!(self.inner.is_empty(), "flush on an unaligned record");
        let file = self.file.as_mut().ok_or(TapeError::Closed)?;
        file.flush().map_err(TapeError::from_write)
    }
}

impl TapeUnit for TapeDevice {
    fn write_file(&mut self, entry: &TarEntry, reader: &mut dyn Read) -> Result<(), TapeError> {
        let header = ustar_header(entry)?;
        self.emit(&header)?;

        let mut copied = 0u64;
        if entry.size > 0 {
            let mut limited = reader.take(entry.size);
            let mut buf = [0u8; 8192];
            loop {
                let n = limited.read(&mut buf).map_err(TapeError::SourceRead)?;
                if n == 0 {
                    break;
                }
                copied += n as u64;
                self.emit(&buf[..n])?;
            }
            if copied != entry.size {
                return Err(TapeError::ShortRead {
                    path: entry.path.clone(),
                    expected: entry.size,
                    actual: copied,
                });
            }
            // Pad the payload to the tar block boundary.
            let pad = (TAR_BLOCK_SIZE - (copied as usize % TAR_BLOCK_SIZE)) % TAR_BLOCK_SIZE;
            self.emit(&ZEROS[..pad])?;
        }

        // End-of-archive footer, then zero-fill so no partial record remains.
        self.emit(&ZEROS)?;
        self.drain_outer()?;
        let mut fill = (self.record_size - self.inner.len()) % self.record_size;
        while fill > 0 {
            let chunk = fill.min(TAR_FOOTER_SIZE);
            self.emit(&ZEROS[..chunk])?;
            fill -= chunk;
        }
        self.flush_buffers()
    }

    fn write_file_mark(&mut self) -> Result<(), TapeError> {
        mtio::do_op(self.fd()?, TapeOp::WriteFileMark).map_err(|source| TapeError::Io {
            op: "write_file_mark",
            source,
        })
    }

    fn jump_to_end_of_media(&mut self) -> Result<(), TapeError> {
        mtio::do_op(self.fd()?, TapeOp::EndOfMedia).map_err(|source| TapeError::Io {
            op: "jump_to_end_of_media",
            source,
        })
    }

    fn file_mark_number(&mut self) -> Result<i64, TapeError> {
        mtio::file_number(self.fd()?).map_err(|source| TapeError::Io {
            op: "file_mark_number",
            source,
        })
    }

    fn retension(&mut self) -> Result<(), TapeError> {
        mtio::do_op(self.fd()?, TapeOp::Retension).map_err(|source| TapeError::Io {
            op: "retension",
            source,
        })
    }

    fn reopen(&mut self) -> Result<(), TapeError> {
        self.file = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| TapeError::Open {
                path: self.path.clone(),
                source,
            })?;
        self.file = Some(file);
        self.outer.clear();
        self.inner.clear();
        debug!(path = %self.path, "reopened tape device");
        Ok(())
    }

    fn close(&mut self) -> Result<(), TapeError> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    const RECORD: usize = 4096;

    fn entry(path: &str, size: u64) -> TarEntry {
        TarEntry {
            path: path.to_string(),
            size,
            mode: 0o644,
            mtime: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn scratch_device() -> (tempfile::TempDir, String) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tape.img");
        std::fs::write(&path, b"").unwrap();
        (dir, path.to_str().unwrap().to_string())
    }

    #[test]
    fn small_file_is_one_record() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();

        let payload = b"hello!\n";
        device
            .write_file(&entry("/ccr/a/hello.txt", 7), &mut Cursor::new(payload))
            .unwrap();
        device.close().unwrap();

        let written = std::fs::read(&path).unwrap();
        // header 512 + payload 7 + pad 505 + footer 1024 = 2048, filled to 4096
        assert_eq!(written.len(), RECORD);
        assert_eq!(&written[0..16], b"/ccr/a/hello.txt");
        assert_eq!(&written[512..519], payload);
        assert!(written[2048..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_byte_file_still_emits_header_and_footer() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();

        device
            .write_file(&entry("/ccr/empty", 0), &mut Cursor::new(&[]))
            .unwrap();
        device.close().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), RECORD);
        assert_eq!(&written[257..263], b"ustar\0");
        // no payload: footer directly after the header block
        assert!(written[512..].iter().all(|&b| b == 0));
    }

    #[test]
    fn payload_crossing_records_stays_aligned() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();

        let payload = vec![0xabu8; 10_000];
        device
            .write_file(&entry("/big/blob", 10_000), &mut Cursor::new(&payload))
            .unwrap();
        device.close().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len() % RECORD, 0);
        // header 512 + payload 10_000 + pad 240 + footer 1024 = 11_776 -> 3 records
        assert_eq!(written.len(), 3 * RECORD);
        assert_eq!(&written[512..10_512], &payload[..]);
    }

    #[test]
    fn short_source_is_rejected() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();

        let result = device.write_file(&entry("/truncated", 100), &mut Cursor::new(b"only this"));
        assert!(matches!(result, Err(TapeError::ShortRead { .. })));
    }

    #[test]
    fn enospc_classifies_as_end_of_media() {
        let err = TapeError::from_write(std::io::Error::from_raw_os_error(libc::ENOSPC));
        assert!(matches!(err, TapeError::EndOfMedia));

        let other = TapeError::from_write(std::io::Error::from_raw_os_error(libc::EIO));
        assert!(matches!(other, TapeError::Io { .. }));
    }

    #[test]
    fn reopen_clears_both_buffers() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();

        // Leave stale bytes in the outer buffer, as an aborted write would.
        device.emit(b"stale partial frame").unwrap();
        device.reopen().unwrap();

        device
            .write_file(&entry("/fresh", 5), &mut Cursor::new(b"fresh"))
            .unwrap();
        device.close().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), RECORD);
        assert_eq!(&written[0..6], b"/fresh");
    }

    #[test]
    fn operations_on_closed_device_fail() {
        let (_dir, path) = scratch_device();
        let mut device = TapeDevice::open(&path, RECORD).unwrap();
        device.close().unwrap();

        let result = device.write_file(&entry("/f", 1), &mut Cursor::new(b"x"));
        assert!(matches!(result, Err(TapeError::Closed)));
    }
}

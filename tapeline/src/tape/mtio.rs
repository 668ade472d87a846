//! Raw magnetic-tape ioctls (Linux `mtio.h`).
//!
//! Only the handful of operations the pipeline needs are exposed: write
//! file mark, space to end of media, retension, and the status read that
//! yields the drive's file-number counter.

use std::io;
use std::os::fd::RawFd;

/// `struct mtop` from `linux/mtio.h`.
#[repr(C)]
struct Mtop {
    mt_op: libc::c_short,
    mt_count: libc::c_int,
}

/// `struct mtget` from `linux/mtio.h`.
#[repr(C)]
struct Mtget {
    mt_type: libc::c_long,
    mt_resid: libc::c_long,
    mt_dsreg: libc::c_long,
    mt_gstat: libc::c_long,
    mt_erreg: libc::c_long,
    mt_fileno: i32,
    mt_blkno: i32,
}

// Tape motion opcodes.
const MTWEOF: libc::c_short = 5;
const MTRETEN: libc::c_short = 9;
const MTEOM: libc::c_short = 12;

// _IOW('m', 1, struct mtop) / _IOR('m', 2, struct mtget).
const fn ioc(dir: libc::c_ulong, nr: libc::c_ulong, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((b'm' as libc::c_ulong) << 8) | nr
}
const MTIOCTOP: libc::c_ulong = ioc(1, 1, std::mem::size_of::<Mtop>());
const MTIOCGET: libc::c_ulong = ioc(2, 2, std::mem::size_of::<Mtget>());

/// Tape motion operations issued through `MTIOCTOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeOp {
    /// Write one file mark.
    WriteFileMark,
    /// Re-tension the cartridge.
    Retension,
    /// Space to end of recorded media.
    EndOfMedia,
}

impl TapeOp {
    fn opcode(self) -> libc::c_short {
        match self {
            TapeOp::WriteFileMark => MTWEOF,
            TapeOp::Retension => MTRETEN,
            TapeOp::EndOfMedia => MTEOM,
        }
    }
}

/// Issue a tape motion ioctl with a count of one.
pub fn do_op(fd: RawFd, op: TapeOp) -> io::Result<()> {
    let request = Mtop {
        mt_op: op.opcode(),
        mt_count: 1,
    };
    // SAFETY: fd is an open tape device and `request` lives across the call.
    let rc = unsafe { libc::ioctl(fd, MTIOCTOP as _, &request) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read the drive status and return the current file number.
pub fn file_number(fd: RawFd) -> io::Result<i64> {
    let mut status = Mtget {
        mt_type: 0,
        mt_resid: 0,
        mt_dsreg: 0,
        mt_gstat: 0,
        mt_erreg: 0,
        mt_fileno: 0,
        mt_blkno: 0,
    };
    // SAFETY: fd is an open tape device and `status` lives across the call.
    let rc = unsafe { libc::ioctl(fd, MTIOCGET as _, &mut status) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(i64::from(status.mt_fileno))
}

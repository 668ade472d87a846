//! ustar header construction.
//!
//! The archive written to tape is plain POSIX ustar, one entry per archive,
//! so any stock `tar` binary can read a file back once the drive is
//! positioned at its file mark.

use super::{TapeError, TarEntry};

/// Tar logical block size; payloads are padded to this boundary.
pub const TAR_BLOCK_SIZE: usize = 512;

/// Size of the mandatory end-of-archive footer (two zero blocks).
pub const TAR_FOOTER_SIZE: usize = 1024;

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;

/// Build the 512-byte ustar header block for one entry.
///
/// Paths longer than the name field are split across the ustar prefix/name
/// pair on a `/` boundary; paths that cannot be split are rejected.
pub fn ustar_header(entry: &TarEntry) -> Result<[u8; TAR_BLOCK_SIZE], TapeError> {
    let (prefix, name) = split_path(&entry.path)?;

    let mut block = [0u8; TAR_BLOCK_SIZE];
    block[..name.len()].copy_from_slice(name.as_bytes());
    write_octal(&mut block[100..108], u64::from(entry.mode & 0o7777));
    write_octal(&mut block[108..116], 0); // uid
    write_octal(&mut block[116..124], 0); // gid
    write_octal(&mut block[124..136], entry.size);
    write_octal(&mut block[136..148], entry.mtime.timestamp().max(0) as u64);
    block[156] = b'0'; // regular file
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());

    // Checksum is computed with its own field set to spaces.
    block[148..156].fill(b' ');
    let sum: u64 = block.iter().map(|&b| u64::from(b)).sum();
    write_octal(&mut block[148..155], sum);
    block[155] = b' ';

    Ok(block)
}

/// Split a path into (prefix, name) fitting the ustar fields.
fn split_path(path: &str) -> Result<(&str, &str), TapeError> {
    if path.len() <= NAME_LEN {
        return Ok(("", path));
    }
    // Find a separator such that both halves fit their fields.
    for (idx, _) in path.match_indices('/') {
        if idx <= PREFIX_LEN && path.len() - idx - 1 <= NAME_LEN && idx > 0 {
            let (prefix, rest) = path.split_at(idx);
            return Ok((prefix, &rest[1..]));
        }
    }
    Err(TapeError::PathTooLong(path.to_string()))
}

/// Zero-padded octal with a trailing NUL, the ustar numeric encoding.
fn write_octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{:0>width$o}", value, width = digits);
    field[..digits].copy_from_slice(&text.as_bytes()[text.len() - digits..]);
    field[digits] = 0;
}

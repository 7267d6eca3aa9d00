// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Packing a [`Registry`] into one contiguous blob and back.
//!
//! Layout, all fields native-endian `i32`, no padding between sections:
//!
//! ```text
//! offset            field
//! ------            -----
//!  0                count
//!  4                trailer_len
//!  8 + 12*i + 0     entries[i].fd
//!  8 + 12*i + 4     entries[i].offset   (into the trailer)
//!  8 + 12*i + 8     entries[i].len
//!  8 + 12*count     trailer: entry names, concatenated, no separators
//! ```
//!
//! [`pack`] writes the blob into an anonymous shared memory segment so the
//! descriptor can be inherited by another process; [`unpack`] rebuilds an
//! independent registry from such a descriptor. Descriptor numbers travel
//! as plain integers; keeping them open in the receiver is the job of
//! whoever passes the segment on.

pub mod shm;

use std::ffi::OsString;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use log::{debug, warn};

use crate::error::{noted, PreopenError, Result};
use crate::registry::Registry;

/// Size of the `count` + `trailer_len` header.
pub const HEADER_LEN: usize = 8;
/// Size of one `{fd, offset, len}` record.
pub const RECORD_LEN: usize = 12;

fn field(value: usize, what: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| PreopenError::InvalidArgument(what))
}

fn put(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

fn get(buf: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    i32::from_ne_bytes(raw)
}

/// Total trailer length: the sum of all entry name lengths.
pub fn trailer_len(reg: &Registry) -> usize {
    reg.iter().map(|e| e.name().len()).sum()
}

/// Exact size in bytes of `reg` once packed.
pub fn packed_len(reg: &Registry) -> usize {
    HEADER_LEN + reg.len() * RECORD_LEN + trailer_len(reg)
}

/// Serialise `reg` into `buf`, which must be exactly [`packed_len`] bytes.
pub fn encode_into(reg: &Registry, buf: &mut [u8]) -> Result<()> {
    if buf.len() != packed_len(reg) {
        return Err(PreopenError::InvalidArgument("pack buffer size mismatch"));
    }
    let trailer = trailer_len(reg);
    put(buf, 0, field(reg.len(), "too many entries")?);
    put(buf, 4, field(trailer, "names too long")?);

    let strtab = HEADER_LEN + reg.len() * RECORD_LEN;
    let mut offset = 0usize;
    for (idx, entry) in reg.iter().enumerate() {
        let name = entry.name().as_bytes();
        let rec = HEADER_LEN + idx * RECORD_LEN;
        put(buf, rec, entry.fd());
        put(buf, rec + 4, field(offset, "names too long")?);
        put(buf, rec + 8, field(name.len(), "names too long")?);
        buf[strtab + offset..strtab + offset + name.len()].copy_from_slice(name);
        offset += name.len();
    }
    Ok(())
}

/// Serialise `reg` into a fresh buffer.
pub fn encode(reg: &Registry) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; packed_len(reg)];
    encode_into(reg, &mut buf)?;
    Ok(buf)
}

fn malformed(msg: String) -> PreopenError {
    warn!("preopen: rejecting packed registry: {}", msg);
    PreopenError::Malformed(msg)
}

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| malformed(format!("negative {what} {value}")))
}

/// Rebuild a registry from a packed blob.
///
/// The blob is untrusted: every length and `(offset, len)` pair is checked
/// against `buf` before any byte is copied. Bytes past the trailer are
/// ignored.
pub fn decode(buf: &[u8]) -> Result<Registry> {
    if buf.len() < HEADER_LEN {
        return Err(malformed(format!("{} bytes is shorter than the header", buf.len())));
    }
    let count = non_negative(get(buf, 0), "entry count")?;
    let trailer = non_negative(get(buf, 4), "trailer length")?;

    let strtab = count
        .checked_mul(RECORD_LEN)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| malformed(format!("{count} entries overrun {} bytes", buf.len())))?;
    let end = strtab
        .checked_add(trailer)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            malformed(format!("trailer of {trailer} bytes overruns {} bytes", buf.len()))
        })?;
    let names = &buf[strtab..end];

    let mut reg = Registry::with_capacity(count)?;
    for idx in 0..count {
        let rec = HEADER_LEN + idx * RECORD_LEN;
        let fd = get(buf, rec);
        let offset = non_negative(get(buf, rec + 4), "name offset")?;
        let len = non_negative(get(buf, rec + 8), "name length")?;
        let name = offset
            .checked_add(len)
            .and_then(|stop| names.get(offset..stop))
            .ok_or_else(|| {
                malformed(format!("entry {idx} name {offset}+{len} outside trailer of {trailer}"))
            })?;
        reg.add(OsString::from_vec(name.to_vec()), fd)
            .map_err(|e| malformed(format!("entry {idx}: {e}")))?;
    }
    Ok(reg)
}

/// Pack `reg` into a new anonymous shared memory segment.
///
/// `reg` is left untouched. On any failure the segment is closed before
/// returning, so no descriptor to a partial blob escapes.
pub fn pack(reg: &Registry) -> Result<OwnedFd> {
    let len = packed_len(reg);
    let fd = shm::create_anonymous(len).map_err(|e| noted(PreopenError::os("shm create", e)))?;
    let mut map = shm::Mapping::new(fd.as_fd(), len, true)
        .map_err(|e| noted(PreopenError::os("mmap", e)))?;
    // SAFETY: the mapping is writable and the segment is not yet visible to
    // anyone but this function.
    let buf = unsafe { map.as_mut_slice() };
    encode_into(reg, buf).map_err(noted)?;
    drop(map);
    debug!("preopen: packed {} entries into {} bytes", reg.len(), len);
    Ok(fd)
}

/// Rebuild a registry from a segment produced by [`pack`].
///
/// The result owns copies of every name and keeps no reference to the
/// segment.
pub fn unpack(fd: BorrowedFd<'_>) -> Result<Registry> {
    let len = shm::region_len(fd).map_err(|e| noted(PreopenError::os("fstat", e)))?;
    if len < HEADER_LEN {
        return Err(noted(malformed(format!("segment of {len} bytes"))));
    }
    let map = shm::Mapping::new(fd, len, false).map_err(|e| noted(PreopenError::os("mmap", e)))?;
    // Validation and copying run on a private snapshot of the segment.
    let bytes = map.snapshot();
    drop(map);
    let reg = decode(&bytes).map_err(noted)?;
    debug!("preopen: unpacked {} entries from {} bytes", reg.len(), len);
    Ok(reg)
}

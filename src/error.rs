// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Error taxonomy for the preopen registry and the last-error buffer.
//!
//! A lookup that matches nothing is not an error; it is reported through
//! [`RelPath::is_found`](crate::registry::RelPath::is_found) instead.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use thiserror::Error;

/// Capacity of the last-error buffer in bytes.
pub const DIAG_CAPACITY: usize = 256;

/// Errors returned by registry, packing and manifest operations.
#[derive(Debug, Error)]
pub enum PreopenError {
    #[error("unable to allocate storage for {0} registry entries")]
    Allocation(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("malformed packed registry: {0}")]
    Malformed(String),
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("default registry lock poisoned")]
    LockPoisoned,
    #[error("manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, PreopenError>;

impl PreopenError {
    /// Wrap the calling thread's current `errno` for `op`.
    pub(crate) fn last_os(op: &'static str) -> Self {
        PreopenError::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn os(op: &'static str, source: io::Error) -> Self {
        PreopenError::Os { op, source }
    }

    /// The OS error code behind this error, if it came from a syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            PreopenError::Os { source, .. } => source.raw_os_error(),
            PreopenError::InvalidArgument(_) => Some(libc::EINVAL),
            PreopenError::Allocation(_) => Some(libc::ENOMEM),
            _ => None,
        }
    }
}

impl From<PreopenError> for io::Error {
    fn from(err: PreopenError) -> Self {
        match err {
            PreopenError::Os { source, .. } => source,
            PreopenError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            PreopenError::Malformed(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            PreopenError::Allocation(_) => io::Error::from_raw_os_error(libc::ENOMEM),
            _ => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

struct DiagBuffer {
    bytes: [u8; DIAG_CAPACITY],
    len: usize,
}

static LAST_ERROR: Lazy<Mutex<DiagBuffer>> = Lazy::new(|| {
    Mutex::new(DiagBuffer {
        bytes: [0; DIAG_CAPACITY],
        len: 0,
    })
});

fn truncated(msg: &str) -> &str {
    if msg.len() <= DIAG_CAPACITY {
        return msg;
    }
    let mut end = DIAG_CAPACITY;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}

/// Overwrite the last-error buffer with `err`'s description.
pub fn record(err: &PreopenError) {
    let msg = err.to_string();
    let msg = truncated(&msg);
    if let Ok(mut buf) = LAST_ERROR.lock() {
        buf.bytes[..msg.len()].copy_from_slice(msg.as_bytes());
        buf.len = msg.len();
    }
}

/// Description of the most recently recorded error, or an empty string.
pub fn last_error() -> String {
    match LAST_ERROR.lock() {
        Ok(buf) => String::from_utf8_lossy(&buf.bytes[..buf.len]).into_owned(),
        Err(_) => String::new(),
    }
}

/// Record `err` and hand it back, for use in `map_err` chains.
pub(crate) fn noted(err: PreopenError) -> PreopenError {
    log::debug!("preopen error: {}", err);
    record(&err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_messages_are_cut_on_char_boundary() {
        let msg = "é".repeat(DIAG_CAPACITY);
        let cut = truncated(&msg);
        assert!(cut.len() <= DIAG_CAPACITY);
        assert_eq!(cut.len() % 2, 0);
    }

    #[test]
    fn record_overwrites_previous() {
        record(&PreopenError::InvalidArgument("first"));
        record(&PreopenError::Malformed("second".into()));
        assert_eq!(last_error(), "malformed packed registry: second");
    }

    #[test]
    fn os_errors_keep_errno() {
        let err = PreopenError::os("openat", io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        let io: io::Error = err.into();
        assert_eq!(io.raw_os_error(), Some(libc::ENOENT));
    }
}

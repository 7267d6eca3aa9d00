// CLASSIFICATION: COMMUNITY
// Filename: handoff.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Registry handoff from a parent process through the environment.
//!
//! A launcher packs its registry with [`pack`](crate::pack::pack), makes the
//! segment inheritable and exports its descriptor number in
//! [`SHARED_MEMORY_FD_VAR`]. The child adopts it the first time a
//! redirected call finds no default registry.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::pack::unpack;
use crate::registry::default::{current_default, set_default};
use crate::registry::SharedRegistry;

/// Environment variable carrying the packed registry's descriptor.
pub const SHARED_MEMORY_FD_VAR: &str = "SHARED_MEMORYFD";

static CONSULTED: AtomicBool = AtomicBool::new(false);

/// Parse a descriptor number: plain decimal digits, nothing else.
pub fn parse_descriptor(value: &str) -> Option<RawFd> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

fn adopt() -> Option<SharedRegistry> {
    let raw = std::env::var(SHARED_MEMORY_FD_VAR).ok()?;
    let Some(fd) = parse_descriptor(&raw) else {
        warn!("preopen: ignoring {}={:?}", SHARED_MEMORY_FD_VAR, raw);
        return None;
    };
    if !is_open(fd) {
        warn!("preopen: {}={} is not an open descriptor", SHARED_MEMORY_FD_VAR, fd);
        return None;
    }
    // SAFETY: checked open above; the segment belongs to the process and is
    // only borrowed for the duration of the unpack.
    let segment = unsafe { BorrowedFd::borrow_raw(fd) };
    let reg = match unpack(segment) {
        Ok(reg) => reg.share(),
        Err(e) => {
            warn!("preopen: cannot adopt registry from fd {}: {}", fd, e);
            return None;
        }
    };
    if let Err(e) = set_default(Some(SharedRegistry::clone(&reg))) {
        warn!("preopen: cannot install inherited registry: {}", e);
        return None;
    }
    info!("preopen: adopted {} entries from fd {}", reg.len(), fd);
    Some(reg)
}

/// Adopt the registry named by the environment, at most once per process.
///
/// Later calls return whatever default is installed by then.
pub fn discover() -> Option<SharedRegistry> {
    if CONSULTED.swap(true, Ordering::AcqRel) {
        return current_default();
    }
    adopt()
}

/// Allow the next [`discover`] to consult the environment again.
pub fn forget() {
    CONSULTED.store(false, Ordering::Release);
}

/// Make `fd` survive `exec` and return the value to export in
/// [`SHARED_MEMORY_FD_VAR`].
pub fn inheritable(fd: BorrowedFd<'_>) -> io::Result<String> {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl on a borrowed, open descriptor.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(raw.to_string())
}

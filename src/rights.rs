// CLASSIFICATION: COMMUNITY
// Filename: rights.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Capability rights attached to preopened directories.
//!
//! Rights are captured once, when a directory is added to a registry, by
//! whatever [`RightsProbe`] the registry was built with. Registries built
//! without a probe do not track rights and match regardless of the rights
//! a lookup asks for.

use std::fmt;
use std::io;
use std::os::fd::RawFd;

use bitflags::bitflags;

bitflags! {
    /// Operations permitted through a directory descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const LOOKUP  = 1 << 0;
        const FSTAT   = 1 << 1;
        const READ    = 1 << 2;
        const WRITE   = 1 << 3;
        const CREATE  = 1 << 4;
        const UNLINK  = 1 << 5;
        const RENAME  = 1 << 6;
        const CONNECT = 1 << 7;
        const EXEC    = 1 << 8;
    }
}

/// Source of rights snapshots for newly added descriptors.
pub trait RightsProbe: Send + Sync {
    /// Report the rights currently held through `fd`.
    fn probe(&self, fd: RawFd) -> io::Result<Rights>;
}

/// Derives rights from what the effective user may do through a
/// directory descriptor.
///
/// `O_PATH` descriptors carry lookup and fstat only. Otherwise each access
/// class that `faccessat(fd, ".", mode, AT_EACCESS)` grants adds its rights,
/// so a read-only directory descriptor that can still create files reports
/// `CREATE`. Non-directory descriptors get lookup and fstat only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessModeProbe;

const BASE: Rights = Rights::LOOKUP.union(Rights::FSTAT);

const ACCESS_CLASSES: [(libc::c_int, Rights); 3] = [
    (libc::R_OK, Rights::READ),
    (
        libc::W_OK,
        Rights::WRITE
            .union(Rights::CREATE)
            .union(Rights::UNLINK)
            .union(Rights::RENAME),
    ),
    (libc::X_OK, Rights::EXEC.union(Rights::CONNECT)),
];

fn path_only(flags: libc::c_int) -> bool {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        flags & libc::O_PATH != 0
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let _ = flags;
        false
    }
}

fn permits(fd: RawFd, mode: libc::c_int) -> bool {
    // SAFETY: "." is a NUL-terminated literal; faccessat writes nothing.
    unsafe { libc::faccessat(fd, c".".as_ptr(), mode, libc::AT_EACCESS) == 0 }
}

impl RightsProbe for AccessModeProbe {
    fn probe(&self, fd: RawFd) -> io::Result<Rights> {
        // SAFETY: F_GETFL takes no pointer arguments.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if path_only(flags) {
            return Ok(BASE);
        }
        Ok(ACCESS_CLASSES
            .iter()
            .filter(|(mode, _)| permits(fd, *mode))
            .fold(BASE, |acc, (_, granted)| acc | *granted))
    }
}

/// Stamps the same rights set on every descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FixedRights(pub Rights);

impl RightsProbe for FixedRights {
    fn probe(&self, _fd: RawFd) -> io::Result<Rights> {
        Ok(self.0)
    }
}

/// Formats as `lookup|fstat|read`, or `none`.
pub struct RightsDisplay(pub Rights);

impl fmt::Display for RightsDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        for (idx, (name, _)) in self.0.iter_names().enumerate() {
            if idx > 0 {
                write!(f, "|")?;
            }
            write!(f, "{}", name.to_ascii_lowercase())?;
        }
        Ok(())
    }
}

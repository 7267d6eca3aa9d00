// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Descriptor-relative replacements for path-taking filesystem calls.
//!
//! Each call looks up the installed registry (the process default, or one
//! handed in through [`handoff`]), rewrites its path into a
//! `(directory descriptor, relative path)` pair and issues the `*at`
//! equivalent. Paths that match no entry go to `AT_FDCWD` unchanged, which
//! under capability mode fails exactly like the unwrapped call would.
//! Without any registry the calls behave like their plain counterparts.
//!
//! Errors from the underlying syscalls are returned verbatim.

pub mod handoff;
#[cfg(feature = "interpose")]
pub mod interpose;
pub(crate) mod sys;

use std::ffi::{CString, OsStr};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libloading::os::unix::Library;
use log::trace;

use crate::registry::default::current_default;
use crate::registry::SharedRegistry;

/// The registry redirected calls resolve against, if any.
///
/// Prefers the process default; otherwise consults the environment handoff
/// once and installs what it finds as the default.
pub fn installed() -> Option<SharedRegistry> {
    current_default().or_else(handoff::discover)
}

/// A path rewritten for an `*at` call.
struct Target {
    dirfd: RawFd,
    relative: CString,
    exact: bool,
}

fn c_path(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn resolve_in(reg: Option<&SharedRegistry>, path: &OsStr) -> io::Result<Target> {
    let Some(reg) = reg else {
        return Ok(Target {
            dirfd: libc::AT_FDCWD,
            relative: c_path(path.as_bytes())?,
            exact: false,
        });
    };
    let rel = reg.find(path, None);
    trace!(
        "redirect: {:?} -> ({:?}, {:?})",
        path,
        rel.dirfd(),
        rel.relative()
    );
    Ok(Target {
        dirfd: rel.dirfd_or(libc::AT_FDCWD),
        relative: c_path(rel.relative().as_bytes())?,
        exact: rel.is_exact(),
    })
}

fn resolve(path: &Path) -> io::Result<Target> {
    resolve_in(installed().as_ref(), path.as_os_str())
}

fn check(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn owned(fd: c_int) -> io::Result<OwnedFd> {
    let fd = check(fd)?;
    // SAFETY: `fd` was just returned by the kernel and has no other owner.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn duplicate(dirfd: RawFd, flags: c_int) -> io::Result<OwnedFd> {
    let cmd = if flags & libc::O_CLOEXEC != 0 {
        libc::F_DUPFD_CLOEXEC
    } else {
        libc::F_DUPFD
    };
    // SAFETY: fcntl duplication takes no pointers.
    owned(unsafe { libc::fcntl(dirfd, cmd, 0) })
}

/// `open(2)`. A path naming a registered directory itself yields a
/// duplicate of that directory's descriptor.
pub fn open(path: &Path, flags: c_int, mode: libc::mode_t) -> io::Result<OwnedFd> {
    let t = resolve(path)?;
    if t.exact {
        return duplicate(t.dirfd, flags);
    }
    // SAFETY: `relative` is NUL-terminated and outlives the call.
    owned(unsafe { libc::openat(t.dirfd, t.relative.as_ptr(), flags, libc::c_uint::from(mode)) })
}

fn stat_at(path: &Path, flags: c_int) -> io::Result<libc::stat> {
    let t = resolve(path)?;
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `st` is a valid out-pointer; `relative` is NUL-terminated.
    check(unsafe { libc::fstatat(t.dirfd, t.relative.as_ptr(), st.as_mut_ptr(), flags) })?;
    // SAFETY: fstatat succeeded and filled `st`.
    Ok(unsafe { st.assume_init() })
}

/// `stat(2)`, following a final symbolic link.
pub fn stat(path: &Path) -> io::Result<libc::stat> {
    stat_at(path, 0)
}

/// `lstat(2)`, reporting on a final symbolic link itself.
pub fn lstat(path: &Path) -> io::Result<libc::stat> {
    stat_at(path, libc::AT_SYMLINK_NOFOLLOW)
}

fn access_at(path: &Path, mode: c_int, flags: c_int) -> io::Result<()> {
    let t = resolve(path)?;
    // SAFETY: `relative` is NUL-terminated and outlives the call.
    check(unsafe { libc::faccessat(t.dirfd, t.relative.as_ptr(), mode, flags) }).map(drop)
}

/// `access(2)`, checked with the real user and group IDs.
pub fn access(path: &Path, mode: c_int) -> io::Result<()> {
    access_at(path, mode, 0)
}

/// `eaccess(2)`, checked with the effective user and group IDs.
pub fn eaccess(path: &Path, mode: c_int) -> io::Result<()> {
    access_at(path, mode, libc::AT_EACCESS)
}

/// `unlink(2)`.
pub fn unlink(path: &Path) -> io::Result<()> {
    let t = resolve(path)?;
    // SAFETY: `relative` is NUL-terminated and outlives the call.
    check(unsafe { libc::unlinkat(t.dirfd, t.relative.as_ptr(), 0) }).map(drop)
}

/// `rename(2)`; each path is resolved on its own.
pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    let reg = installed();
    let src = resolve_in(reg.as_ref(), from.as_os_str())?;
    let dst = resolve_in(reg.as_ref(), to.as_os_str())?;
    // SAFETY: both paths are NUL-terminated and outlive the call.
    check(unsafe {
        libc::renameat(
            src.dirfd,
            src.relative.as_ptr(),
            dst.dirfd,
            dst.relative.as_ptr(),
        )
    })
    .map(drop)
}

fn unix_addr(path: &[u8]) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    if path.len() >= addr.sun_path.len() {
        return Err(io::Error::from_raw_os_error(libc::ENAMETOOLONG));
    }
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, &src) in addr.sun_path.iter_mut().zip(path) {
        *dst = src as libc::c_char;
    }
    let len = std::mem::offset_of!(libc::sockaddr_un, sun_path) + path.len() + 1;
    #[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "ios"))]
    {
        addr.sun_len = len as u8;
    }
    Ok((addr, len as libc::socklen_t))
}

/// `connect(2)` to the `AF_UNIX` socket at `path`.
pub fn connect(sock: BorrowedFd<'_>, path: &Path) -> io::Result<()> {
    let t = resolve(path)?;
    connect_target(sock.as_raw_fd(), &t)
}

#[cfg(target_os = "freebsd")]
fn connect_target(sock: RawFd, t: &Target) -> io::Result<()> {
    let (addr, len) = unix_addr(t.relative.as_bytes())?;
    // SAFETY: `addr` is a fully initialised sockaddr_un of `len` bytes.
    check(unsafe {
        sys::connect_at(t.dirfd, sock, (&addr as *const libc::sockaddr_un).cast(), len)
    })
    .map(drop)
}

#[cfg(not(target_os = "freebsd"))]
fn connect_target(sock: RawFd, t: &Target) -> io::Result<()> {
    let path = if t.dirfd == libc::AT_FDCWD {
        t.relative.as_bytes().to_vec()
    } else {
        let mut p = format!("/proc/self/fd/{}/", t.dirfd).into_bytes();
        p.extend_from_slice(t.relative.as_bytes());
        p
    };
    let (addr, len) = unix_addr(&path)?;
    // SAFETY: `addr` is a fully initialised sockaddr_un of `len` bytes.
    check(unsafe { sys::connect(sock, (&addr as *const libc::sockaddr_un).cast(), len) }).map(drop)
}

fn dl_error(path: &Path) -> io::Error {
    let msg = sys::dlerror().unwrap_or_else(|| format!("cannot load {}", path.display()));
    io::Error::new(io::ErrorKind::Other, msg)
}

/// Raw `dlopen(3)` handle for `path`, or null with the error in `dlerror`.
///
/// Bare library names without a separator keep the loader's search path.
pub(crate) fn dlopen_handle(path: &Path, flags: c_int) -> io::Result<*mut libc::c_void> {
    let bytes = path.as_os_str().as_bytes();
    let reg = match installed() {
        Some(reg) if bytes.contains(&b'/') => reg,
        _ => {
            let c = c_path(bytes)?;
            return Ok(sys::dlopen(Some(c.as_c_str()), flags));
        }
    };
    let t = resolve_in(Some(&reg), path.as_os_str())?;
    // SAFETY: `relative` is NUL-terminated and outlives the call.
    let file = owned(unsafe {
        libc::openat(t.dirfd, t.relative.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC)
    })?;
    Ok(sys::dlopen_fd(file.as_raw_fd(), flags))
}

/// `dlopen(3)` of the shared object at `path`, loaded through a descriptor
/// when a registry is installed.
pub fn dlopen(path: &Path, flags: c_int) -> io::Result<Library> {
    let handle = dlopen_handle(path, flags)?;
    if handle.is_null() {
        return Err(dl_error(path));
    }
    // SAFETY: `handle` came from a successful dlopen and is not shared.
    Ok(unsafe { Library::from_raw(handle) })
}

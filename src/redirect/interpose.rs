// CLASSIFICATION: COMMUNITY
// Filename: interpose.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! C ABI replacements exported when built with the `interpose` feature.
//!
//! Loaded ahead of the C library (for example with `LD_PRELOAD`), these
//! take the place of the libc symbols of the same name and route every
//! path through the installed registry. Results follow the C convention:
//! `-1` with `errno` set on failure.

use std::ffi::{CStr, OsStr};
use std::io;
use std::os::fd::{BorrowedFd, IntoRawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::{c_char, c_int, c_void, mode_t};

use super::sys;

fn fail(err: io::Error) -> c_int {
    let code = err.raw_os_error().unwrap_or(libc::EIO);
    // SAFETY: called on the thread that made the failing call.
    unsafe { sys::set_errno(code) };
    -1
}

fn done(res: io::Result<()>) -> c_int {
    match res {
        Ok(()) => 0,
        Err(e) => fail(e),
    }
}

fn c_to_path(path: &CStr) -> &Path {
    Path::new(OsStr::from_bytes(path.to_bytes()))
}

/// Borrow a C path argument; null yields `EFAULT`.
unsafe fn arg<'a>(path: *const c_char) -> io::Result<&'a Path> {
    if path.is_null() {
        return Err(io::Error::from_raw_os_error(libc::EFAULT));
    }
    Ok(c_to_path(CStr::from_ptr(path)))
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    match arg(path).and_then(|p| super::open(p, flags, mode)) {
        Ok(fd) => fd.into_raw_fd(),
        Err(e) => fail(e),
    }
}

unsafe fn stat_into(
    path: *const c_char,
    buf: *mut libc::stat,
    call: fn(&Path) -> io::Result<libc::stat>,
) -> c_int {
    if buf.is_null() {
        return fail(io::Error::from_raw_os_error(libc::EFAULT));
    }
    match arg(path).and_then(call) {
        Ok(st) => {
            buf.write(st);
            0
        }
        Err(e) => fail(e),
    }
}

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_into(path, buf, super::stat)
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_into(path, buf, super::lstat)
}

#[no_mangle]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    done(arg(path).and_then(|p| super::access(p, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn eaccess(path: *const c_char, mode: c_int) -> c_int {
    done(arg(path).and_then(|p| super::eaccess(p, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    done(arg(path).and_then(super::unlink))
}

#[no_mangle]
pub unsafe extern "C" fn rename(from: *const c_char, to: *const c_char) -> c_int {
    done(arg(from).and_then(|f| super::rename(f, arg(to)?)))
}

/// Filesystem path named by a `sockaddr_un`, or `None` for any other
/// family, an unnamed socket or a Linux abstract address.
unsafe fn socket_path<'a>(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<&'a Path> {
    let base = std::mem::offset_of!(libc::sockaddr_un, sun_path);
    let len = len as usize;
    if addr.is_null() || len <= base || c_int::from((*addr).sa_family) != libc::AF_UNIX {
        return None;
    }
    let un = &*addr.cast::<libc::sockaddr_un>();
    let avail = (len - base).min(un.sun_path.len());
    let raw = std::slice::from_raw_parts(un.sun_path.as_ptr().cast::<u8>(), avail);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(avail);
    if end == 0 {
        return None;
    }
    Some(Path::new(OsStr::from_bytes(&raw[..end])))
}

#[no_mangle]
pub unsafe extern "C" fn connect(
    sock: c_int,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
) -> c_int {
    match socket_path(addr, len) {
        Some(path) if sock >= 0 => done(super::connect(BorrowedFd::borrow_raw(sock), path)),
        _ => sys::connect(sock, addr, len),
    }
}

#[no_mangle]
pub unsafe extern "C" fn dlopen(path: *const c_char, flags: c_int) -> *mut c_void {
    if path.is_null() {
        return sys::dlopen(None, flags);
    }
    match super::dlopen_handle(c_to_path(CStr::from_ptr(path)), flags) {
        Ok(handle) => handle,
        Err(e) => {
            fail(e);
            std::ptr::null_mut()
        }
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: sys.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Entry points the redirection layer calls after rewriting a path.
//!
//! With the `interpose` feature this library defines `connect` and `dlopen`
//! itself, so the next definition in link order is looked up instead of
//! calling back into our own wrappers.

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};

#[cfg(target_os = "freebsd")]
extern "C" {
    fn fdlopen(fd: c_int, mode: c_int) -> *mut c_void;
    fn connectat(fd: c_int, s: c_int, name: *const libc::sockaddr, namelen: libc::socklen_t)
        -> c_int;
}

#[cfg(feature = "interpose")]
mod next {
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_int, c_void};

    use once_cell::sync::Lazy;

    pub type ConnectFn =
        unsafe extern "C" fn(c_int, *const libc::sockaddr, libc::socklen_t) -> c_int;
    pub type DlopenFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;

    fn lookup(name: &CStr) -> *mut c_void {
        // SAFETY: RTLD_NEXT lookup of a NUL-terminated symbol name.
        unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
    }

    pub static CONNECT: Lazy<Option<ConnectFn>> = Lazy::new(|| {
        let sym = lookup(c"connect");
        // SAFETY: `connect` has this signature in every libc we link against.
        (!sym.is_null()).then(|| unsafe { std::mem::transmute::<*mut c_void, ConnectFn>(sym) })
    });

    pub static DLOPEN: Lazy<Option<DlopenFn>> = Lazy::new(|| {
        let sym = lookup(c"dlopen");
        // SAFETY: `dlopen` has this signature in every libc we link against.
        (!sym.is_null()).then(|| unsafe { std::mem::transmute::<*mut c_void, DlopenFn>(sym) })
    });

    pub fn missing() -> c_int {
        // SAFETY: writes the calling thread's errno.
        unsafe { super::set_errno(libc::ENOSYS) };
        -1
    }
}

/// `connect(2)` as provided by the C library.
///
/// # Safety
/// `addr` must point to `len` readable bytes of socket address.
pub unsafe fn connect(sock: c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> c_int {
    #[cfg(feature = "interpose")]
    {
        match *next::CONNECT {
            Some(real) => real(sock, addr, len),
            None => next::missing(),
        }
    }
    #[cfg(not(feature = "interpose"))]
    {
        libc::connect(sock, addr, len)
    }
}

/// `connect(2)` with the socket path resolved relative to `dirfd`.
///
/// # Safety
/// As for [`connect`].
#[cfg(target_os = "freebsd")]
pub unsafe fn connect_at(
    dirfd: c_int,
    sock: c_int,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
) -> c_int {
    connectat(dirfd, sock, addr, len)
}

/// `dlopen(3)` as provided by the C library. `None` opens the main program.
pub fn dlopen(path: Option<&CStr>, flags: c_int) -> *mut c_void {
    let path = path.map_or(std::ptr::null(), CStr::as_ptr);
    #[cfg(feature = "interpose")]
    {
        match *next::DLOPEN {
            // SAFETY: `path` is null or NUL-terminated.
            Some(real) => unsafe { real(path, flags) },
            None => std::ptr::null_mut(),
        }
    }
    #[cfg(not(feature = "interpose"))]
    {
        // SAFETY: `path` is null or NUL-terminated.
        unsafe { libc::dlopen(path, flags) }
    }
}

/// Load a shared object through an open descriptor.
#[cfg(target_os = "freebsd")]
pub fn dlopen_fd(fd: c_int, flags: c_int) -> *mut c_void {
    // SAFETY: fdlopen only reads from `fd`.
    unsafe { fdlopen(fd, flags) }
}

/// Load a shared object through an open descriptor.
#[cfg(not(target_os = "freebsd"))]
pub fn dlopen_fd(fd: c_int, flags: c_int) -> *mut c_void {
    match std::ffi::CString::new(format!("/proc/self/fd/{fd}")) {
        Ok(path) => dlopen(Some(&path), flags),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Message from the most recent failed `dlopen`, if any.
pub fn dlerror() -> Option<String> {
    // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        None
    } else {
        // SAFETY: checked non-null above.
        Some(unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned())
    }
}

/// Set the calling thread's `errno`.
///
/// # Safety
/// Must only be called from a thread with a live libc errno slot.
#[cfg(feature = "interpose")]
pub unsafe fn set_errno(code: c_int) {
    #[cfg(target_os = "linux")]
    {
        *libc::__errno_location() = code;
    }
    #[cfg(target_os = "android")]
    {
        *libc::__errno() = code;
    }
    #[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "ios"))]
    {
        *libc::__error() = code;
    }
}

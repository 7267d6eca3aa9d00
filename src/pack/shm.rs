// CLASSIFICATION: COMMUNITY
// Filename: shm.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Anonymous shared memory segments and their mappings.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

/// Create an anonymous, zero-filled shared memory segment of `len` bytes.
///
/// The descriptor is inheritable across `exec`; nothing else names the
/// segment, so it lives exactly as long as some descriptor for it is open.
pub fn create_anonymous(len: usize) -> io::Result<OwnedFd> {
    let fd = open_segment()?;
    let size = libc::off_t::try_from(len)
        .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
    // SAFETY: `fd` is a valid descriptor owned by this function.
    if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_segment() -> io::Result<OwnedFd> {
    // SAFETY: the name is a NUL-terminated literal.
    let fd = unsafe { libc::memfd_create(c"cohesix-preopen".as_ptr(), 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: freshly created descriptor, not owned elsewhere.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(target_os = "freebsd")]
fn open_segment() -> io::Result<OwnedFd> {
    // SAFETY: SHM_ANON is the documented sentinel path for anonymous segments.
    let fd = unsafe { libc::shm_open(libc::SHM_ANON, libc::O_RDWR | libc::O_CREAT, 0o600) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: freshly created descriptor, not owned elsewhere.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn open_segment() -> io::Result<OwnedFd> {
    use std::ffi::CString;
    use std::sync::atomic::{AtomicU32, Ordering};

    use log::warn;

    static SEQ: AtomicU32 = AtomicU32::new(0);
    let name = format!(
        "/cohpo.{}.{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `name` is NUL-terminated and outlives both calls.
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600 as libc::c_uint,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `name` is still NUL-terminated and alive.
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        warn!(
            "preopen: shm_unlink {:?} failed: {}",
            name,
            io::Error::last_os_error()
        );
    }
    // SAFETY: freshly created descriptor, not owned elsewhere.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Size in bytes of the object behind `fd`.
pub fn region_len(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut sb = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `sb` is a valid out-pointer for one `struct stat`.
    if unsafe { libc::fstat(fd.as_raw_fd(), sb.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstat succeeded and filled `sb`.
    let sb = unsafe { sb.assume_init() };
    usize::try_from(sb.st_size).map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))
}

/// A shared mapping of a whole segment, unmapped on drop.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// Map `len` bytes of `fd` shared; `writable` adds `PROT_WRITE`.
    pub fn new(fd: BorrowedFd<'_>, len: usize, writable: bool) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };
        // SAFETY: mapping a descriptor we borrow; the result is checked below.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the mapped bytes into process-private memory.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        // SAFETY: the mapping covers `len` readable bytes and `out` is a
        // distinct allocation of the same size.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), out.as_mut_ptr(), self.len) };
        out
    }

    /// Mutable view of a writable mapping.
    ///
    /// # Safety
    /// The mapping must have been created writable, and no other process may
    /// access the segment while the returned slice is alive.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a live mapping created in `new`.
        unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
    }
}

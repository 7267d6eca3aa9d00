// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Registry of preopened directories.
//!
//! A [`Registry`] maps path prefixes to directory descriptors that were
//! opened before the process lost access to the global filesystem
//! namespace. Entries keep insertion order; the [matcher] relies on it to
//! break ties between equally long prefixes.
//!
//! The registry tracks descriptor numbers only. It never closes them.

pub mod default;
pub mod matcher;

use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{noted, PreopenError, Result};
use crate::rights::{Rights, RightsDisplay, RightsProbe};

pub use matcher::{is_prefix, RelPath};

/// A registry shared between holders; cloning retains, dropping releases.
pub type SharedRegistry = Arc<Registry>;

/// One preopened directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: OsString,
    fd: RawFd,
    rights: Option<Rights>,
}

impl Entry {
    /// Prefix this directory answers for.
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Rights captured when the entry was added, if the registry tracks them.
    pub fn rights(&self) -> Option<Rights> {
        self.rights
    }
}

/// Ordered set of `(prefix, directory descriptor)` pairs.
#[derive(Clone)]
pub struct Registry {
    entries: Vec<Entry>,
    capacity: usize,
    probe: Option<Arc<dyn RightsProbe>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries)
            .field("capacity", &self.capacity)
            .field("tracks_rights", &self.probe.is_some())
            .finish()
    }
}

fn reserve(entries: &mut Vec<Entry>, capacity: usize) -> Result<()> {
    let extra = capacity.saturating_sub(entries.len());
    entries
        .try_reserve_exact(extra)
        .map_err(|_| noted(PreopenError::Allocation(capacity)))
}

impl Registry {
    /// Create an empty registry with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut entries = Vec::new();
        reserve(&mut entries, capacity)?;
        Ok(Self {
            entries,
            capacity,
            probe: None,
        })
    }

    /// Create an empty registry that snapshots each entry's rights with `probe`.
    pub fn with_rights(capacity: usize, probe: Arc<dyn RightsProbe>) -> Result<Self> {
        let mut reg = Self::with_capacity(capacity)?;
        reg.probe = Some(probe);
        Ok(reg)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that fit before the next growth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tracks_rights(&self) -> bool {
        self.probe.is_some()
    }

    /// Register `fd` under the prefix `name`.
    ///
    /// `name` is copied. The append is all-or-nothing: if growing the
    /// storage or probing rights fails the registry is left as it was.
    pub fn add(&mut self, name: impl AsRef<OsStr>, fd: RawFd) -> Result<()> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(noted(PreopenError::InvalidArgument("empty path")));
        }
        if name.as_bytes().contains(&0) {
            return Err(noted(PreopenError::InvalidArgument("path contains NUL")));
        }
        if fd < 0 {
            return Err(noted(PreopenError::InvalidArgument("negative descriptor")));
        }

        let rights = match &self.probe {
            Some(probe) => Some(
                probe
                    .probe(fd)
                    .map_err(|e| noted(PreopenError::os("rights probe", e)))?,
            ),
            None => None,
        };

        if self.entries.len() == self.capacity {
            self.grow()?;
        } else if self.entries.len() == self.entries.capacity() {
            // A clone carries `capacity` but not the reservation behind it.
            reserve(&mut self.entries, self.capacity)?;
        }

        debug!(
            "preopen: {:?} -> fd {} rights={}",
            name,
            fd,
            rights.map_or_else(|| "untracked".to_string(), |r| RightsDisplay(r).to_string())
        );
        self.entries.push(Entry {
            name: name.to_os_string(),
            fd,
            rights,
        });
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let target = self.capacity.saturating_mul(2).max(1);
        let mut enlarged = Vec::new();
        reserve(&mut enlarged, target)?;
        enlarged.extend(self.entries.drain(..));
        self.entries = enlarged;
        debug!("preopen: registry grew {} -> {}", self.capacity, target);
        self.capacity = target;
        Ok(())
    }

    /// Open the directory `path` in the ambient namespace and register it
    /// under the same name. Returns the new descriptor.
    pub fn preopen(&mut self, path: impl AsRef<Path>, flags: libc::c_int) -> Result<RawFd> {
        let path = path.as_ref();
        self.preopen_as(path.as_os_str(), path, flags)
    }

    /// Open the directory `path` and register it under `name`.
    ///
    /// On failure nothing is registered and the opened descriptor is closed.
    pub fn preopen_as(
        &mut self,
        name: impl AsRef<OsStr>,
        path: impl AsRef<Path>,
        flags: libc::c_int,
    ) -> Result<RawFd> {
        let dir = open_dir(path.as_ref(), flags).map_err(noted)?;
        self.add(name, dir.as_raw_fd())?;
        Ok(dir.into_raw_fd())
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn name_at(&self, index: usize) -> Option<&OsStr> {
        self.entries.get(index).map(Entry::name)
    }

    pub fn fd_at(&self, index: usize) -> Option<RawFd> {
        self.entries.get(index).map(Entry::fd)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Visit entries in insertion order until `visitor` breaks.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(usize, &Entry) -> ControlFlow<()>,
    {
        for (idx, entry) in self.entries.iter().enumerate() {
            if visitor(idx, entry).is_break() {
                break;
            }
        }
    }

    /// Resolve `path` against this registry; see [`matcher::find`].
    pub fn find<'a>(&self, path: &'a OsStr, required: Option<Rights>) -> RelPath<'a> {
        matcher::find(self, path, required)
    }

    /// Move this registry behind a reference count.
    pub fn share(self) -> SharedRegistry {
        Arc::new(self)
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Take another reference to a shared registry.
pub fn retain(reg: &SharedRegistry) -> SharedRegistry {
    let held = Arc::clone(reg);
    trace!("preopen: retain -> {} holders", Arc::strong_count(&held));
    held
}

/// Drop one reference; the registry is freed with its last holder.
pub fn release(reg: Option<SharedRegistry>) {
    if let Some(reg) = reg {
        trace!("preopen: release, {} holders before", Arc::strong_count(&reg));
        drop(reg);
    }
}

/// Open `path` as a directory relative to the current working directory.
pub(crate) fn open_dir(path: &Path, flags: libc::c_int) -> Result<OwnedFd> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| PreopenError::InvalidArgument("path contains NUL"))?;
    // SAFETY: `c_path` is NUL-terminated and outlives the call.
    let fd = unsafe {
        libc::openat(
            libc::AT_FDCWD,
            c_path.as_ptr(),
            flags | libc::O_RDONLY | libc::O_DIRECTORY,
        )
    };
    if fd == -1 {
        return Err(PreopenError::last_os("openat"));
    }
    // SAFETY: `fd` was just returned by openat and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

// CLASSIFICATION: COMMUNITY
// Filename: matcher.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Longest-prefix resolution of paths against a [`Registry`].

use std::ffi::OsStr;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;

use super::Registry;
use crate::rights::Rights;

const SEPARATOR: u8 = b'/';
const CURRENT_DIR: &str = ".";

/// A path expressed relative to a preopened directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelPath<'a> {
    dirfd: Option<RawFd>,
    relative: &'a OsStr,
    exact: bool,
}

impl<'a> RelPath<'a> {
    /// Directory the path is relative to, `None` when nothing matched.
    pub fn dirfd(&self) -> Option<RawFd> {
        self.dirfd
    }

    /// Remaining path below the matched directory. When nothing matched this
    /// is the original path, unmodified.
    pub fn relative(&self) -> &'a OsStr {
        self.relative
    }

    pub fn is_found(&self) -> bool {
        self.dirfd.is_some()
    }

    /// True when the path names the matched directory itself: nothing but
    /// separators followed the matched prefix.
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Base descriptor for an `*at` call, falling back to `fallback`.
    pub fn dirfd_or(&self, fallback: RawFd) -> RawFd {
        self.dirfd.unwrap_or(fallback)
    }
}

/// Is `dir` a path prefix of `path`?
///
/// Every byte of `dir` must match and the next byte of `path` must be a
/// separator or the end of the path, so `/foo` covers `/foo/bar` but not
/// `/foobar`. The rule holds for names ending in a separator too: `/`
/// covers `/` and `//x`, not `/etc`.
pub fn is_prefix(dir: &[u8], path: &[u8]) -> bool {
    if dir.is_empty() || !path.starts_with(dir) {
        return false;
    }
    matches!(path.get(dir.len()), None | Some(&SEPARATOR))
}

/// Find the entry whose name is the longest path prefix of `path`.
///
/// With `required` set, entries whose captured rights do not contain it are
/// skipped; registries that do not track rights skip nothing. Equal-length
/// matches resolve to the earliest inserted entry.
pub fn find<'a>(reg: &Registry, path: &'a OsStr, required: Option<Rights>) -> RelPath<'a> {
    let bytes = path.as_bytes();
    let mut best: Option<(usize, RawFd)> = None;

    for entry in reg.iter() {
        let name = entry.name().as_bytes();
        if best.map_or(false, |(len, _)| name.len() <= len) {
            continue;
        }
        if !is_prefix(name, bytes) {
            continue;
        }
        if let (Some(want), Some(have)) = (required, entry.rights()) {
            if !have.contains(want) {
                continue;
            }
        }
        best = Some((name.len(), entry.fd()));
    }

    match best {
        Some((len, fd)) => {
            let rest = remainder(bytes, len);
            RelPath {
                dirfd: Some(fd),
                relative: if rest.is_empty() {
                    OsStr::new(CURRENT_DIR)
                } else {
                    OsStr::from_bytes(rest)
                },
                exact: rest.is_empty(),
            }
        }
        None => RelPath {
            dirfd: None,
            relative: path,
            exact: false,
        },
    }
}

fn remainder(path: &[u8], matched: usize) -> &[u8] {
    let rest = &path[matched..];
    let skip = rest.iter().take_while(|&&b| b == SEPARATOR).count();
    &rest[skip..]
}

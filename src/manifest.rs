// CLASSIFICATION: COMMUNITY
// Filename: manifest.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Preopen manifests: the list of directories a launcher captures before
//! entering capability mode.
//!
//! ```toml
//! capacity = 8
//! track_rights = true
//!
//! [[preopen]]
//! path = "/usr/share/data"
//! name = "/data"
//! optional = false
//! ```
//!
//! JSON and YAML files with the same shape are accepted, chosen by file
//! extension.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{noted, PreopenError, Result};
use crate::registry::default::{set_default, DEFAULT_CAPACITY};
use crate::registry::{Registry, SharedRegistry};
use crate::rights::AccessModeProbe;

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// One directory to capture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreopenSpec {
    /// Directory opened in the ambient namespace.
    pub path: PathBuf,
    /// Registered prefix; defaults to `path`.
    #[serde(default)]
    pub name: Option<String>,
    /// Skip with a warning when the directory cannot be opened.
    #[serde(default)]
    pub optional: bool,
}

impl PreopenSpec {
    pub fn prefix(&self) -> &Path {
        self.name.as_deref().map_or(self.path.as_path(), Path::new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub track_rights: bool,
    #[serde(default)]
    pub preopen: Vec<PreopenSpec>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest {
            capacity: DEFAULT_CAPACITY,
            track_rights: false,
            preopen: Vec::new(),
        }
    }
}

fn manifest_error(path: &Path, reason: impl ToString) -> PreopenError {
    noted(PreopenError::Manifest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })
}

impl Manifest {
    /// Read a manifest from disk. `.json`, `.yaml` and `.yml` files use the
    /// matching parser; anything else is read as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| manifest_error(path, e))?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| manifest_error(path, e)),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&text).map_err(|e| manifest_error(path, e))
            }
            _ => toml::from_str(&text).map_err(|e| manifest_error(path, e)),
        }?;
        debug!("preopen: loaded manifest {}", path.display());
        Ok(parsed)
    }

    pub fn parse_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| manifest_error(Path::new("<inline>"), e))
    }

    /// Open every listed directory, in order, into a fresh registry.
    ///
    /// If a required entry cannot be opened, the descriptors this call
    /// already opened are closed and the error is returned.
    pub fn build(&self) -> Result<Registry> {
        let mut reg = if self.track_rights {
            Registry::with_rights(self.capacity, Arc::new(AccessModeProbe))?
        } else {
            Registry::with_capacity(self.capacity)?
        };
        let mut opened: Vec<RawFd> = Vec::with_capacity(self.preopen.len());

        for spec in &self.preopen {
            match reg.preopen_as(spec.prefix().as_os_str(), &spec.path, 0) {
                Ok(fd) => opened.push(fd),
                Err(e) if spec.optional => {
                    warn!("preopen: skipping optional {}: {}", spec.path.display(), e);
                }
                Err(e) => {
                    for fd in opened {
                        // SAFETY: opened by this call and registered nowhere
                        // that outlives it.
                        drop(unsafe { OwnedFd::from_raw_fd(fd) });
                    }
                    return Err(e);
                }
            }
        }
        Ok(reg)
    }

    /// Build the registry and install it as the process default.
    pub fn install(&self) -> Result<SharedRegistry> {
        let reg = self.build()?.share();
        set_default(Some(SharedRegistry::clone(&reg)))?;
        Ok(reg)
    }
}

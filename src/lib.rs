// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Preopened directory registry for capability-mode sandboxes.
//!
//! A process about to give up access to the global filesystem namespace
//! first opens the directories it will need and records them in a
//! [`Registry`]. Afterwards, absolute paths are rewritten into
//! `(directory descriptor, relative path)` pairs by longest-prefix match
//! and served by the `*at` family of syscalls. Registries can be packed
//! into an anonymous shared memory segment and handed to a child process
//! through the environment.

/// Error taxonomy and the last-error buffer.
pub mod error;

/// Rights snapshots captured at registration.
pub mod rights;

/// The registry, prefix matching and the process default.
pub mod registry;

/// Shared-memory packing of registries.
pub mod pack;

/// Path-rewriting wrappers and the environment handoff.
pub mod redirect;

/// Declarative preopen manifests.
pub mod manifest;

pub use error::{last_error, PreopenError, Result};
pub use manifest::{Manifest, PreopenSpec};
pub use pack::{pack, unpack};
pub use registry::default::{
    clear_default, current_default, get_default, set_default, update_default,
    DefaultRegistryGuard,
};
pub use registry::{release, retain, Entry, Registry, RelPath, SharedRegistry};
pub use rights::{AccessModeProbe, FixedRights, Rights, RightsProbe};

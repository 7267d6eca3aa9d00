// CLASSIFICATION: COMMUNITY
// Filename: default.rs v0.1
// Author: Lukas Bower
// Date Modified: 2027-09-02

//! Process-wide default registry.
//!
//! The slot is meant to be filled once, early, before the process starts
//! additional threads. Replacing it releases the previous registry; holders
//! that retained it keep a valid copy until they drop it.

use std::sync::{Arc, Mutex, MutexGuard};

use log::info;
use once_cell::sync::Lazy;

use super::{Registry, SharedRegistry};
use crate::error::{noted, PreopenError, Result};

/// Capacity of the registry created on first use of [`get_default`].
pub const DEFAULT_CAPACITY: usize = 4;

static DEFAULT: Lazy<Mutex<Option<SharedRegistry>>> = Lazy::new(|| Mutex::new(None));

fn slot() -> Result<MutexGuard<'static, Option<SharedRegistry>>> {
    DEFAULT.lock().map_err(|_| noted(PreopenError::LockPoisoned))
}

/// Return the default registry, creating an empty one if none is installed.
pub fn get_default() -> Result<SharedRegistry> {
    let mut slot = slot()?;
    if let Some(reg) = slot.as_ref() {
        return Ok(Arc::clone(reg));
    }
    let reg = Registry::with_capacity(DEFAULT_CAPACITY)?.share();
    *slot = Some(Arc::clone(&reg));
    Ok(reg)
}

/// The installed default registry, without creating one.
pub fn current_default() -> Option<SharedRegistry> {
    DEFAULT.lock().ok().and_then(|slot| slot.clone())
}

/// Install `reg` as the default, releasing the previous one. `None` clears it.
pub fn set_default(reg: Option<SharedRegistry>) -> Result<()> {
    let installed = reg.as_ref().map(|r| r.len());
    let previous = {
        let mut slot = slot()?;
        std::mem::replace(&mut *slot, reg)
    };
    if let Some(len) = installed {
        info!("preopen: default registry installed ({} entries)", len);
    }
    drop(previous);
    Ok(())
}

pub fn clear_default() -> Result<()> {
    set_default(None)
}

/// Mutate the default registry in place, creating it if needed.
///
/// If another holder still retains the current default, it keeps its
/// unmodified copy and the slot receives the updated one. `f` runs with the
/// slot locked and must not call back into this module.
pub fn update_default<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&mut Registry) -> Result<T>,
{
    let mut slot = slot()?;
    let reg = match slot.take() {
        Some(reg) => reg,
        None => Registry::with_capacity(DEFAULT_CAPACITY)?.share(),
    };
    let reg = slot.insert(reg);
    f(Arc::make_mut(reg))
}

/// Clears the default registry on creation and again on drop.
///
/// Tests that install a default registry hold one of these.
pub struct DefaultRegistryGuard;

impl DefaultRegistryGuard {
    pub fn new() -> Self {
        let _ = clear_default();
        crate::redirect::handoff::forget();
        DefaultRegistryGuard
    }
}

impl Default for DefaultRegistryGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DefaultRegistryGuard {
    fn drop(&mut self) {
        let _ = clear_default();
        crate::redirect::handoff::forget();
    }
}

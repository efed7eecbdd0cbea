//! Bookkeeping for runtime redirections.
//!
//! [`InterceptionManager`] owns every redirection it creates and tracks its
//! lifecycle; the patching itself is delegated to a [`DetourBackend`].

mod backend;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod inline;
mod slot;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

pub use backend::{BackendError, Detour, DetourBackend};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use inline::{InlineBackend, InlineDetour};
pub use slot::{SlotBackend, SlotDetour};

use crate::error::{Error, Result};

/// Handle to one redirection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HookId(pub u32);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HookState {
    Created,
    Enabled,
    Disabled,
    Destroyed,
}

/// Snapshot of one redirection, for logging and plans
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookSummary {
    pub id: HookId,
    pub name: String,
    pub target: usize,
    pub replacement: usize,
    pub state: HookState,
}

struct HookEntry<D> {
    id: HookId,
    name: String,
    target: usize,
    replacement: usize,
    state: HookState,
    detour: Option<D>,
}

/// Creates, toggles and tears down redirections.
///
/// Not synchronized: every call happens on the control thread.
pub struct InterceptionManager<B: DetourBackend> {
    backend: B,
    // Creation order; destroyed entries stay for diagnostics
    hooks: Vec<HookEntry<B::Detour>>,
    bound: HashMap<usize, HookId>,
    next_id: u32,
}

impl<B: DetourBackend> InterceptionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            hooks: Vec::new(),
            bound: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Prepare a redirection of `target` to `replacement`, initially disabled.
    ///
    /// # Safety
    ///
    /// Same contract as [`DetourBackend::intercept`].
    pub unsafe fn create(&mut self, name: &str, target: usize, replacement: usize) -> Result<HookId> {
        if target == 0 {
            return Err(Error::NullTarget(name.to_string()));
        }
        if let Some(existing) = self.bound.get(&target) {
            return Err(Error::AlreadyBound {
                target,
                existing: self.entry(*existing)?.name.clone(),
            });
        }

        // SAFETY: forwarded from the caller's contract
        let detour = unsafe { self.backend.intercept(target, replacement) }.map_err(|e| {
            Error::HookInstall {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        let id = HookId(self.next_id);
        self.next_id += 1;
        self.bound.insert(target, id);
        self.hooks.push(HookEntry {
            id,
            name: name.to_string(),
            target,
            replacement,
            state: HookState::Created,
            detour: Some(detour),
        });
        debug!("Created {} for {} at 0x{:X}", id, name, target);
        Ok(id)
    }

    /// Route calls through the replacement; no-op when already enabled.
    pub fn enable(&mut self, id: HookId) -> Result<()> {
        let entry = self.live_entry_mut(id)?;
        if entry.state == HookState::Enabled {
            return Ok(());
        }
        if let Some(detour) = entry.detour.as_mut() {
            detour.enable().map_err(|e| Error::HookInstall {
                name: entry.name.clone(),
                reason: e.to_string(),
            })?;
        }
        entry.state = HookState::Enabled;
        info!("Redirected {} (0x{:X} -> 0x{:X})", entry.name, entry.target, entry.replacement);
        Ok(())
    }

    /// Restore the original control path; no-op when not enabled.
    pub fn disable(&mut self, id: HookId) -> Result<()> {
        let entry = self.live_entry_mut(id)?;
        if entry.state != HookState::Enabled {
            return Ok(());
        }
        if let Some(detour) = entry.detour.as_mut() {
            detour.disable().map_err(|e| Error::HookInstall {
                name: entry.name.clone(),
                reason: e.to_string(),
            })?;
        }
        entry.state = HookState::Disabled;
        debug!("Disabled {}", entry.name);
        Ok(())
    }

    /// Restore the original control path and release the redirection.
    ///
    /// Destroying an already destroyed hook does nothing.
    pub fn destroy(&mut self, id: HookId) -> Result<()> {
        if self.entry(id)?.state == HookState::Destroyed {
            return Ok(());
        }
        self.disable(id)?;

        let index = self.index_of(id)?;
        let entry = &mut self.hooks[index];
        entry.detour = None;
        entry.state = HookState::Destroyed;
        self.bound.remove(&entry.target);
        debug!("Destroyed {}", entry.name);
        Ok(())
    }

    /// Destroy every hook, newest first.
    ///
    /// Keeps going past failures and returns the first one.
    pub fn destroy_all(&mut self) -> Result<()> {
        let ids: Vec<HookId> = self.hooks.iter().rev().map(|h| h.id).collect();
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.destroy(id) {
                warn!("Failed to destroy {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Address that runs the target's original behavior.
    pub fn original_address(&self, id: HookId) -> Result<usize> {
        let entry = self.entry(id)?;
        entry
            .detour
            .as_ref()
            .map(Detour::original)
            .ok_or_else(|| Error::InvalidState {
                expected: "live hook".to_string(),
                actual: format!("{} {}", entry.name, entry.state),
            })
    }

    /// The original behavior as a callable function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the target's signature.
    pub unsafe fn original<F: Copy>(&self, id: HookId) -> Result<F> {
        const { assert!(std::mem::size_of::<F>() == std::mem::size_of::<usize>()) };
        let address = self.original_address(id)?;
        // SAFETY: F is pointer-sized and the caller vouches for its type
        Ok(unsafe { std::mem::transmute_copy::<usize, F>(&address) })
    }

    pub fn state(&self, id: HookId) -> Option<HookState> {
        self.entry(id).ok().map(|e| e.state)
    }

    /// Every hook ever created, in creation order
    pub fn summaries(&self) -> Vec<HookSummary> {
        self.hooks
            .iter()
            .map(|h| HookSummary {
                id: h.id,
                name: h.name.clone(),
                target: h.target,
                replacement: h.replacement,
                state: h.state,
            })
            .collect()
    }

    /// Hooks not yet destroyed
    pub fn live_count(&self) -> usize {
        self.bound.len()
    }

    fn index_of(&self, id: HookId) -> Result<usize> {
        self.hooks
            .iter()
            .position(|h| h.id == id)
            .ok_or(Error::UnknownHook(id.0))
    }

    fn entry(&self, id: HookId) -> Result<&HookEntry<B::Detour>> {
        self.index_of(id).map(|i| &self.hooks[i])
    }

    fn live_entry_mut(&mut self, id: HookId) -> Result<&mut HookEntry<B::Detour>> {
        let index = self.index_of(id)?;
        let entry = &mut self.hooks[index];
        if entry.state == HookState::Destroyed {
            return Err(Error::InvalidState {
                expected: "live hook".to_string(),
                actual: format!("{} {}", entry.name, entry.state),
            });
        }
        Ok(entry)
    }
}

impl<B: DetourBackend> Drop for InterceptionManager<B> {
    fn drop(&mut self) {
        let _ = self.destroy_all();
    }
}

impl<B: DetourBackend> fmt::Debug for InterceptionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionManager")
            .field("hooks", &self.summaries())
            .finish_non_exhaustive()
    }
}

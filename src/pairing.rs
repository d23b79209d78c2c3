//! Variable pairings: substitution maps for `replace` and `compose`.
//!
//! A pairing starts out mutable — entries are added with [`BddPairing::set`]
//! and friends — and becomes immutable once
//! [`BddPairing::freeze_and_install`] registers it with its factory. Only
//! installed pairings can be used in operations: the installed identity is
//! part of the replace-cache key, so the factory interns pairings by their
//! entry set. Two pairings built independently from the same entries
//! resolve to the same identity, and with it to the same cached results.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::{Engine, PairTarget};
use crate::error::{BddError, Result};
use crate::handle::Bdd;

enum PairState {
    Building(BTreeMap<u32, PairTarget>),
    Installed(u32),
}

pub struct BddPairing {
    engine: Rc<RefCell<Engine>>,
    factory_id: u64,
    epoch: u32,
    state: RefCell<PairState>,
}

impl BddPairing {
    pub(crate) fn new(engine: Rc<RefCell<Engine>>, factory_id: u64, epoch: u32) -> BddPairing {
        BddPairing {
            engine,
            factory_id,
            epoch,
            state: RefCell::new(PairState::Building(BTreeMap::new())),
        }
    }

    pub(crate) fn factory_id(&self) -> u64 {
        self.factory_id
    }

    /// Identity of the installed pairing; fails while still mutable.
    pub(crate) fn installed_id(&self) -> Result<u32> {
        match *self.state.borrow() {
            PairState::Installed(id) => Ok(id),
            PairState::Building(_) => Err(BddError::config(
                "pairing must be frozen and installed before use",
            )),
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(*self.state.borrow(), PairState::Installed(_))
    }

    /// Replaces a previous target for `old`, releasing the reference held
    /// on a node target.
    fn put(&self, old: u32, target: PairTarget) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entries = match &mut *state {
            PairState::Building(entries) => entries,
            PairState::Installed(_) => return Err(BddError::FrozenPairing),
        };
        let previous = entries.insert(old, target);
        if let Some(PairTarget::Node(node)) = previous {
            let mut engine = self.engine.borrow_mut();
            if engine.check_epoch(self.epoch).is_ok() {
                engine.release(node);
            }
        }
        Ok(())
    }

    /// Maps `old` to another variable.
    pub fn set(&self, old: u32, new: u32) -> Result<()> {
        self.put(old, PairTarget::Var(new))
    }

    /// Maps each `old[i]` to `new[i]`.
    pub fn set_pairs(&self, old: &[u32], new: &[u32]) -> Result<()> {
        if old.len() != new.len() {
            return Err(BddError::config(format!(
                "mismatched pair arrays: {} old vs {} new",
                old.len(),
                new.len()
            )));
        }
        for (&o, &n) in old.iter().zip(new) {
            self.set(o, n)?;
        }
        Ok(())
    }

    /// Maps `old` to an arbitrary BDD. `replace` uses only the topmost
    /// variable of shallow targets; deeper targets are substituted through
    /// the compose path.
    pub fn set_bdd(&self, old: u32, new: &Bdd) -> Result<()> {
        if new.factory_id != self.factory_id {
            return Err(BddError::CrossFactory);
        }
        {
            let mut engine = self.engine.borrow_mut();
            engine.check_epoch(self.epoch)?;
            // The pairing holds a reference until install hands it to the
            // factory (or a dedup hit releases it).
            engine.acquire(new.root);
        }
        self.put(old, PairTarget::Node(new.root))
    }

    /// Maps each `old[i]` to the BDD `new[i]`.
    pub fn set_bdd_pairs(&self, old: &[u32], new: &[&Bdd]) -> Result<()> {
        if old.len() != new.len() {
            return Err(BddError::config(format!(
                "mismatched pair arrays: {} old vs {} new",
                old.len(),
                new.len()
            )));
        }
        for (&o, n) in old.iter().zip(new) {
            self.set_bdd(o, n)?;
        }
        Ok(())
    }

    /// Canonicalizes the entry set and registers the pairing with the
    /// factory. Idempotent; afterwards every `set` fails with
    /// [`BddError::FrozenPairing`].
    pub fn freeze_and_install(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entries = match &*state {
            PairState::Installed(_) => return Ok(()),
            PairState::Building(entries) => entries.clone(),
        };
        let id = {
            let mut engine = self.engine.borrow_mut();
            engine.check_epoch(self.epoch)?;
            engine.install_pairing(&entries)?
        };
        *state = PairState::Installed(id);
        Ok(())
    }
}

impl Drop for BddPairing {
    fn drop(&mut self) {
        // Only a pairing still under construction owns references.
        if let PairState::Building(entries) = &*self.state.borrow() {
            if let Ok(mut engine) = self.engine.try_borrow_mut() {
                if engine.check_epoch(self.epoch).is_ok() {
                    for target in entries.values() {
                        if let PairTarget::Node(node) = target {
                            engine.release(*node);
                        }
                    }
                }
            }
        }
    }
}

/// Installed pairings compare by identity; pairings under construction
/// compare equal only to themselves.
impl PartialEq for BddPairing {
    fn eq(&self, other: &BddPairing) -> bool {
        if self.factory_id != other.factory_id || self.epoch != other.epoch {
            return false;
        }
        match (&*self.state.borrow(), &*other.state.borrow()) {
            (PairState::Installed(a), PairState::Installed(b)) => a == b,
            _ => std::ptr::eq(self, other),
        }
    }
}

impl Eq for BddPairing {}

impl fmt::Debug for BddPairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            PairState::Installed(id) => write!(f, "BddPairing(installed #{})", id),
            PairState::Building(entries) => {
                write!(f, "BddPairing(building, {} entries)", entries.len())
            }
        }
    }
}

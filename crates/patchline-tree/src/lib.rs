//! Observable JSON state tree.
//!
//! A [`StateTree`] owns a `serde_json::Value` document and pushes every
//! committed structural mutation to registered listeners as a [`Patch`], in
//! commit order. No implicit reactivity: producers mutate through the
//! explicit [`add`](StateTree::add) / [`replace`](StateTree::replace) /
//! [`remove`](StateTree::remove) API (or replay a patch range), and each
//! successful commit notifies.
//!
//! Patch ranges apply all-or-nothing: ops run against a working copy and the
//! document is swapped only if every op succeeds, so observers never see a
//! partially-patched tree.

pub mod apply;
pub mod types;

pub use types::{Patch, PatchOp, TreeError};

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use patchline_pointer::format_pointer;
use serde_json::{Map, Value};

/// Handle to a registered listener, for [`StateTree::unobserve`].
pub type ListenerId = u64;

struct Registry {
    next_id: ListenerId,
    listeners: BTreeMap<ListenerId, Box<dyn FnMut(&Patch) + Send + Sync>>,
}

impl Registry {
    fn notify(&mut self, patch: &Patch) {
        for listener in self.listeners.values_mut() {
            listener(patch);
        }
    }
}

/// A shared, observable JSON document.
///
/// Cheap to clone; all clones address the same document. Mutations are
/// serialized by the observer registry lock, which doubles as the ordering
/// guarantee for notifications. Listeners must not call back into
/// [`observe`](StateTree::observe)/[`unobserve`](StateTree::unobserve) from
/// within a notification.
#[derive(Clone)]
pub struct StateTree {
    doc: Arc<Mutex<Value>>,
    observers: Arc<Mutex<Registry>>,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl StateTree {
    pub fn new(initial: Value) -> Self {
        Self {
            doc: Arc::new(Mutex::new(initial)),
            observers: Arc::new(Mutex::new(Registry {
                next_id: 1,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Immutable point-in-time copy of the whole document.
    pub fn snapshot(&self) -> Value {
        self.doc.lock().clone()
    }

    /// Copy of one top-level branch, if present.
    pub fn branch(&self, key: &str) -> Option<Value> {
        self.doc.lock().get(key).cloned()
    }

    /// An object holding exactly the named top-level keys that exist, each
    /// branch copied independently of the rest of the document.
    pub fn snapshot_branches(&self, keys: &[String]) -> Value {
        let doc = self.doc.lock();
        let mut out = Map::new();
        for key in keys {
            if let Some(value) = doc.get(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        Value::Object(out)
    }

    /// Register a structural-mutation listener. Invoked with each committed
    /// patch, in commit order.
    pub fn observe<F>(&self, listener: F) -> ListenerId
    where
        F: FnMut(&Patch) + Send + Sync + 'static,
    {
        let mut registry = self.observers.lock();
        let id = registry.next_id;
        registry.next_id = registry.next_id.saturating_add(1);
        registry.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn unobserve(&self, id: ListenerId) -> bool {
        self.observers.lock().listeners.remove(&id).is_some()
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.observers.lock().listeners.len()
    }

    /// Insert a value at `pointer` (upsert for object keys, insert/append for
    /// array indexes).
    pub fn add(&self, pointer: &str, value: Value) -> Result<(), TreeError> {
        self.commit(vec![Patch::add(pointer, value)])
    }

    /// Replace the value at `pointer`; the target must exist.
    pub fn replace(&self, pointer: &str, value: Value) -> Result<(), TreeError> {
        self.commit(vec![Patch::replace(pointer, value, None)])
    }

    /// Remove the value at `pointer`; the target must exist.
    pub fn remove(&self, pointer: &str) -> Result<(), TreeError> {
        self.commit(vec![Patch::remove(pointer, None)])
    }

    /// Apply a patch range atomically: either every patch lands or the
    /// document is untouched. Listeners are notified only after the whole
    /// range commits.
    pub fn apply_patches(&self, patches: &[Patch]) -> Result<(), TreeError> {
        self.commit(patches.to_vec())
    }

    /// Replace the whole document with a snapshot. Observers see a single
    /// root `replace` patch.
    pub fn apply_snapshot(&self, snapshot: Value) {
        let mut registry = self.observers.lock();
        let old = {
            let mut doc = self.doc.lock();
            std::mem::replace(&mut *doc, snapshot.clone())
        };
        registry.notify(&Patch::replace("", snapshot, Some(old)));
    }

    /// Replace one top-level branch with an independently produced snapshot.
    /// Keys outside `key` are untouched, so a partial mirror (only some
    /// branches materialized) can be synchronized in place.
    pub fn apply_branch_snapshot(&self, key: &str, snapshot: Value) -> Result<(), TreeError> {
        self.put_branch(key, snapshot)
    }

    /// Assign a top-level branch value directly (non-structured branch
    /// values, where no snapshot semantics apply).
    pub fn set_branch(&self, key: &str, value: Value) -> Result<(), TreeError> {
        self.put_branch(key, value)
    }

    fn put_branch(&self, key: &str, value: Value) -> Result<(), TreeError> {
        let mut registry = self.observers.lock();
        let old = {
            let mut doc = self.doc.lock();
            match &mut *doc {
                Value::Object(map) => map.insert(key.to_string(), value.clone()),
                _ => return Err(TreeError::InvalidTarget),
            }
        };
        let pointer = format_pointer(&[key.to_string()]);
        let patch = match old {
            Some(old) => Patch::replace(pointer, value, Some(old)),
            None => Patch::add(pointer, value),
        };
        registry.notify(&patch);
        Ok(())
    }

    // Lock order: observers -> doc. The doc lock is never held while
    // notifying, and listeners may read the tree but not mutate it.
    fn commit(&self, mut patches: Vec<Patch>) -> Result<(), TreeError> {
        let mut registry = self.observers.lock();
        {
            let mut doc = self.doc.lock();
            let mut working = doc.clone();
            for patch in patches.iter_mut() {
                let displaced = apply::apply_one(&mut working, patch)?;
                let records_old = matches!(patch.op, PatchOp::Replace | PatchOp::Remove);
                if records_old && patch.old_value.is_none() {
                    patch.old_value = displaced;
                }
            }
            *doc = working;
        }
        for patch in &patches {
            registry.notify(patch);
        }
        Ok(())
    }
}

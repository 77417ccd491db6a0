//! Id-keyed lookup tables.
//!
//! A [Registry] maps a numeric id (usually the id of a generic registry node) back to the
//! concrete object that owns it. Entries are weak: the registry never keeps an object alive,
//! and lookups of dropped objects return [None].
//!
//! Concurrency: lookups take the read side of a [RwLock]; inserts and removals take the write
//! side. No lock is held while the caller uses a returned handle.
use crate::handle::{Handle, HandleRef};
use alloc::{collections::btree_map::BTreeMap, vec::Vec};
use spin::RwLock;

pub struct Registry<T> {
    map: RwLock<BTreeMap<u64, HandleRef<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub const fn new() -> Registry<T> {
        Registry {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `handle` under `id`.
    ///
    /// Return `false` if the id is already taken by a live object. A dead entry under the same
    /// id is silently replaced.
    pub fn insert(&self, id: u64, handle: &Handle<T>) -> bool {
        let mut guard = self.map.write();
        if let Some(existing) = guard.get(&id)
            && existing.get_handle().is_some()
        {
            return false;
        }
        guard.insert(id, handle.create_ref());
        true
    }

    /// Forget `id`. Return whether an entry was present.
    pub fn remove(&self, id: u64) -> bool {
        self.map.write().remove(&id).is_some()
    }

    /// Look up a live object by id.
    pub fn get(&self, id: u64) -> Option<Handle<T>> {
        self.map.read().get(&id)?.get_handle()
    }

    /// Snapshot of all live objects, in id order.
    pub fn live(&self) -> Vec<Handle<T>> {
        self.map
            .read()
            .values()
            .filter_map(HandleRef::get_handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

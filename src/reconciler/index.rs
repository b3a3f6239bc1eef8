// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Secondary maps from an indexed field value to the set of objects
// carrying it, and the indexed binding that pairs reconciled objects with
// local objects sharing the same field value.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::ObjectUuid;

/// Field-value index over a collection: `K` is the indexed field type,
/// `V` the handle stored per object (a shared object handle, or just the
/// object id). Populated through the collection's index hooks.
pub struct ObjectCollectionIndex<K, V> {
    value_map: HashMap<ObjectUuid, K>,
    object_index: HashMap<K, Vec<V>>,
    empty: Vec<V>,
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> Default for ObjectCollectionIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> ObjectCollectionIndex<K, V> {
    pub fn new() -> Self {
        Self {
            value_map: HashMap::new(),
            object_index: HashMap::new(),
            empty: Vec::new(),
        }
    }

    /// All objects whose indexed field currently holds `index_value`.
    pub fn get_indexed_objects(&self, index_value: &K) -> &[V] {
        self.object_index
            .get(index_value)
            .unwrap_or(&self.empty)
            .as_slice()
    }

    pub fn on_create(&mut self, id: ObjectUuid, index_value: K, obj: V) {
        self.value_map.insert(id, index_value.clone());
        self.object_index.entry(index_value).or_default().push(obj);
    }

    pub fn on_delete(&mut self, id: ObjectUuid, obj: &V) {
        let Some(index_value) = self.value_map.remove(&id) else {
            return;
        };
        if let Some(vec) = self.object_index.get_mut(&index_value) {
            vec.retain(|candidate| candidate != obj);
            if vec.is_empty() {
                self.object_index.remove(&index_value);
            }
        }
    }

    /// Re-file an object whose indexed field changed value.
    pub fn on_update(&mut self, id: ObjectUuid, new_value: K, obj: V) {
        let old_value = self.value_map.get(&id).cloned();
        if old_value.as_ref() == Some(&new_value) {
            return;
        }
        if old_value.is_some() {
            self.on_delete(id, &obj);
        }
        self.on_create(id, new_value, obj);
    }
}

/// A local object that can be paired with reconciled objects sharing its
/// field value. `add_binding` returns false to refuse a pairing (e.g. the
/// local object is already bound).
pub trait IndexBoundObject<R> {
    fn add_binding(&self, reconciled: &R) -> bool;
    fn remove_binding(&self, reconciled: &R);
}

/// Extends the index with a parallel map of local objects keyed by the
/// same field, so that when a reconciled object appears or disappears the
/// matching local objects are bound or unbound automatically.
pub struct ObjectCollectionIndexedBinding<K, R, L> {
    index: ObjectCollectionIndex<K, R>,
    local_objects: HashMap<K, Vec<L>>,
    bound_local_objects: HashMap<ObjectUuid, Vec<L>>,
}

impl<K, R, L> Default for ObjectCollectionIndexedBinding<K, R, L>
where
    K: Eq + Hash + Clone,
    R: Clone + PartialEq,
    L: IndexBoundObject<R> + Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R, L> ObjectCollectionIndexedBinding<K, R, L>
where
    K: Eq + Hash + Clone,
    R: Clone + PartialEq,
    L: IndexBoundObject<R> + Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            index: ObjectCollectionIndex::new(),
            local_objects: HashMap::new(),
            bound_local_objects: HashMap::new(),
        }
    }

    pub fn get_indexed_objects(&self, index_value: &K) -> &[R] {
        self.index.get_indexed_objects(index_value)
    }

    /// Register a local object under `index_value` and bind it to the
    /// first reconciled object already carrying that value, if any.
    pub fn add_local_object(&mut self, index_value: K, local: L, id_of: impl Fn(&R) -> ObjectUuid) {
        self.local_objects
            .entry(index_value.clone())
            .or_default()
            .push(local.clone());

        if let Some(reconciled) = self.index.get_indexed_objects(&index_value).first() {
            if local.add_binding(reconciled) {
                let id = id_of(reconciled);
                self.bound_local_objects.entry(id).or_default().push(local);
            }
        }
    }

    /// Unregister a local object and unbind it from any reconciled objects
    /// under the same value.
    pub fn remove_local_object(
        &mut self,
        index_value: &K,
        local: &L,
        id_of: impl Fn(&R) -> ObjectUuid,
    ) {
        if let Some(vec) = self.local_objects.get_mut(index_value) {
            vec.retain(|candidate| candidate != local);
            if vec.is_empty() {
                self.local_objects.remove(index_value);
            }
        }

        for reconciled in self.index.get_indexed_objects(index_value) {
            local.remove_binding(reconciled);
            let id = id_of(reconciled);
            if let Some(bound) = self.bound_local_objects.get_mut(&id) {
                bound.retain(|candidate| candidate != local);
                if bound.is_empty() {
                    self.bound_local_objects.remove(&id);
                }
            }
        }
    }

    /// A reconciled object appeared: index it and bind every waiting local
    /// object under the same value.
    pub fn on_create(&mut self, id: ObjectUuid, index_value: K, reconciled: R) {
        self.index.on_create(id, index_value.clone(), reconciled.clone());

        if let Some(locals) = self.local_objects.get(&index_value) {
            let bound = self.bound_local_objects.entry(id).or_default();
            for local in locals {
                if local.add_binding(&reconciled) {
                    bound.push(local.clone());
                }
            }
        }
    }

    /// A reconciled object disappeared: unbind its local partners and drop
    /// it from the index.
    pub fn on_delete(&mut self, id: ObjectUuid, reconciled: &R) {
        self.index.on_delete(id, reconciled);

        if let Some(bound) = self.bound_local_objects.remove(&id) {
            for local in &bound {
                local.remove_binding(reconciled);
            }
        }
    }
}

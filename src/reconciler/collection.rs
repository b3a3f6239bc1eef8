// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A homogeneous, id-keyed store of objects, authoritative on exactly one
// side of a stream pair. Locally owned collections push creates, updates
// and deletes outbound; remotely owned collections are reconstructed from
// inbound events through a create delegate.

use std::collections::{HashMap, HashSet};

use log::error;

use crate::accessor::MemoryAccessor;
use crate::reconciler::change_types::{CollectionChangeEventAccessor, CollectionChangeType};
use crate::reconciler::interfaces::{
    FullUpdateEntry, MessageSender, ObjectCollectionInterface, OutboxHandle,
};
use crate::reconciler::reconciler::DataStoreReconciler;
use crate::transport::{ChangeEvent, TransportStreamAccessor};
use crate::types::ObjectUuid;

/// The local object type stored in a collection. Objects serialize their
/// own field changes and track their own dirty mask and created-remotely
/// bit; the collection routes lifecycle traffic and field masks to them.
pub trait MirroredObject: 'static {
    fn id(&self) -> ObjectUuid;

    /// Emit a CreateObject event the first time, UpdateObject (with the
    /// accumulated field mask) afterwards.
    fn write_changes(&mut self, accessor: &mut TransportStreamAccessor, collection_id: i32);

    /// Apply an inbound update; `fields_changed` has already been filtered
    /// by the collection's inbound mask.
    fn process_update(&mut self, mem: MemoryAccessor, fields_changed: u64);

    fn process_message(&mut self, field_id: i32, timestamp_us: u64, mem: MemoryAccessor);

    /// Prepare for retransmission: re-arm the created bit and full dirty
    /// mask, and return the creation timestamp used for full-update
    /// ordering. Returning 0 excludes the object from full updates.
    fn prep_full_update(&mut self) -> u64 {
        0
    }

    fn tick(&mut self) {}

    /// Teardown hook invoked when a remote object is deleted, shut down,
    /// or dropped by a full reconcile.
    fn handle_delete(&mut self) {}
}

/// Fan-out target for secondary indexes. Wired by generated code between a
/// collection and an `ObjectCollectionIndex`.
pub trait CollectionIndexHook<O> {
    fn on_create(&mut self, obj: &O);
    fn on_update(&mut self, obj: &O, fields_changed: u64);
    fn on_delete(&mut self, obj: &O);
}

type CreateDelegate<O> = Box<dyn FnMut(ObjectUuid, MemoryAccessor) -> Option<O>>;

pub struct ObjectCollection<O: MirroredObject> {
    collection_id: i32,
    inbound_field_mask: u64,
    indexed_field_mask: u64,
    local_owned: bool,
    outbox: OutboxHandle,
    objects: HashMap<ObjectUuid, O>,
    create_delegate: Option<CreateDelegate<O>>,
    index_hooks: Vec<Box<dyn CollectionIndexHook<O>>>,
}

impl<O: MirroredObject> ObjectCollection<O> {
    /// `inbound_field_mask` filters which inbound field-change bits apply
    /// (the complement of the fields this side authors);
    /// `indexed_field_mask` names fields that fan out to indexes.
    pub fn new(
        reconciler: &DataStoreReconciler,
        collection_id: i32,
        inbound_field_mask: u64,
        indexed_field_mask: u64,
        local_owned: bool,
    ) -> Self {
        Self {
            collection_id,
            inbound_field_mask,
            indexed_field_mask,
            local_owned,
            outbox: reconciler.outbox_handle(),
            objects: HashMap::new(),
            create_delegate: None,
            index_hooks: Vec::new(),
        }
    }

    /// Install the constructor for remotely owned objects. Ignored on
    /// locally owned collections.
    pub fn set_create_delegate(
        &mut self,
        delegate: impl FnMut(ObjectUuid, MemoryAccessor) -> Option<O> + 'static,
    ) {
        if !self.local_owned {
            self.create_delegate = Some(Box::new(delegate));
        }
    }

    pub fn add_index_hook(&mut self, hook: impl CollectionIndexHook<O> + 'static) {
        self.index_hooks.push(Box::new(hook));
    }

    /// Handle for object code to send messages without borrowing the
    /// collection.
    pub fn message_sender(&self) -> MessageSender {
        MessageSender::new(self.outbox.clone(), self.collection_id)
    }

    pub fn get_object(&self, id: &ObjectUuid) -> Option<&O> {
        self.objects.get(id)
    }

    pub fn get_object_mut(&mut self, id: &ObjectUuid) -> Option<&mut O> {
        self.objects.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &O> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Insert a locally owned object and queue its create for the next
    /// outbound tick. No-op on remotely owned collections.
    pub fn add_object(&mut self, obj: O) {
        if !self.local_owned {
            return;
        }

        let id = obj.id();
        self.objects.insert(id, obj);
        self.outbox
            .borrow_mut()
            .notify_object_needs_write(id, self.collection_id);

        if self.indexed_field_mask != 0 {
            let obj = self.objects.get(&id).unwrap();
            for hook in &mut self.index_hooks {
                hook.on_create(obj);
            }
        }
    }

    /// Remove a locally owned object. The queued write finds no live
    /// object and turns into a DeleteObject event at flush time.
    pub fn remove_object(&mut self, id: ObjectUuid) {
        if !self.local_owned {
            return;
        }

        let Some(obj) = self.objects.remove(&id) else {
            return;
        };
        if self.indexed_field_mask != 0 {
            for hook in &mut self.index_hooks {
                hook.on_delete(&obj);
            }
        }
        self.outbox
            .borrow_mut()
            .notify_object_needs_write(id, self.collection_id);
    }

    /// Mark fields of a local object dirty: queues the object for the next
    /// outbound flush and fans changed indexed fields out to hooks.
    pub fn set_dirty(&mut self, id: ObjectUuid, fields_changed: u64) {
        self.outbox
            .borrow_mut()
            .notify_object_needs_write(id, self.collection_id);

        if self.indexed_field_mask & fields_changed != 0 {
            if let Some(obj) = self.objects.get(&id) {
                for hook in &mut self.index_hooks {
                    hook.on_update(obj, fields_changed);
                }
            }
        }
    }

    fn delete_internal(&mut self, id: ObjectUuid) {
        let Some(mut obj) = self.objects.remove(&id) else {
            return;
        };
        if self.indexed_field_mask != 0 {
            for hook in &mut self.index_hooks {
                hook.on_delete(&obj);
            }
        }
        obj.handle_delete();
    }

    // Returns false when the update applied to nothing (no surviving mask
    // bits or unknown object), which tells the upsert path to create.
    fn process_update_internal(
        &mut self,
        id: ObjectUuid,
        mem: MemoryAccessor,
        fields_changed: u64,
        notify: bool,
    ) -> bool {
        let fields_changed = fields_changed & self.inbound_field_mask;
        if fields_changed == 0 {
            return false;
        }

        let Some(obj) = self.objects.get_mut(&id) else {
            return false;
        };
        obj.process_update(mem, fields_changed);

        if notify && self.indexed_field_mask & fields_changed != 0 {
            let obj = self.objects.get(&id).unwrap();
            for hook in &mut self.index_hooks {
                hook.on_update(obj, fields_changed);
            }
        }

        true
    }
}

impl<O: MirroredObject> ObjectCollectionInterface for ObjectCollection<O> {
    fn collection_id(&self) -> i32 {
        self.collection_id
    }

    fn is_local_owned(&self) -> bool {
        self.local_owned
    }

    fn tick(&mut self) {
        for obj in self.objects.values_mut() {
            obj.tick();
        }
    }

    fn write_changes(&mut self, accessor: &mut TransportStreamAccessor, id: ObjectUuid) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.write_changes(accessor, self.collection_id);
        } else if self.local_owned {
            let event = accessor.write_change_event::<CollectionChangeEventAccessor>(
                CollectionChangeType::DeleteObject as i32,
                0,
                0,
            );
            if !event.memory().is_null() {
                event.set_collection_id(self.collection_id);
                event.set_object_id(id);
            }
        }
    }

    fn prep_full_update(&mut self, entries: &mut Vec<FullUpdateEntry>) {
        for (id, obj) in &mut self.objects {
            let timestamp = obj.prep_full_update();
            if timestamp > 0 {
                entries.push(FullUpdateEntry {
                    object_id: *id,
                    collection_id: self.collection_id,
                    timestamp,
                });
            }
        }
    }

    fn process_create(&mut self, id: ObjectUuid, mem: MemoryAccessor) {
        if self.local_owned {
            return;
        }

        let Some(delegate) = self.create_delegate.as_mut() else {
            error!("collection {}: no create delegate registered", self.collection_id);
            return;
        };
        let Some(obj) = delegate(id, mem) else {
            error!("collection {}: create delegate failed for {id}", self.collection_id);
            return;
        };

        self.objects.insert(id, obj);
        // install initial field values with the full inbound mask
        let inbound_mask = self.inbound_field_mask;
        self.process_update_internal(id, mem, inbound_mask, false);

        if self.indexed_field_mask != 0 {
            let obj = self.objects.get(&id).unwrap();
            for hook in &mut self.index_hooks {
                hook.on_create(obj);
            }
        }
    }

    fn process_update(&mut self, id: ObjectUuid, mem: MemoryAccessor, fields_changed: u64) -> bool {
        self.process_update_internal(id, mem, fields_changed, true)
    }

    fn process_delete(&mut self, id: ObjectUuid) {
        if self.local_owned {
            return;
        }
        self.delete_internal(id);
    }

    fn process_message(
        &mut self,
        id: ObjectUuid,
        field_id: i32,
        timestamp_us: u64,
        mem: MemoryAccessor,
    ) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.process_message(field_id, timestamp_us, mem);
        }
    }

    fn process_upsert(&mut self, id: ObjectUuid, mem: MemoryAccessor) {
        let inbound_mask = self.inbound_field_mask;
        if !self.process_update_internal(id, mem, inbound_mask, true) {
            self.process_create(id, mem);
        }
    }

    fn process_full_reconcile(&mut self, reconciled_ids: &HashSet<ObjectUuid>) {
        if self.local_owned {
            return;
        }
        let stale: Vec<ObjectUuid> = self
            .objects
            .keys()
            .filter(|id| !reconciled_ids.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.delete_internal(id);
        }
    }

    fn process_shutdown(&mut self) {
        if self.local_owned {
            return;
        }
        let all: Vec<ObjectUuid> = self.objects.keys().copied().collect();
        for id in all {
            self.delete_internal(id);
        }
    }
}

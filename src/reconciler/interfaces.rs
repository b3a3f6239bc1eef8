// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Interfaces between the reconciler and its collections, plus the shared
// outbox: the pending-write queue and the fixed message arena that
// outbound ticks flush into the changelog.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::accessor::MemoryAccessor;
use crate::transport::TransportStreamAccessor;
use crate::types::ObjectUuid;

/// One object enumerated for a full update, with its creation timestamp so
/// retransmission preserves causal creation order.
pub struct FullUpdateEntry {
    pub object_id: ObjectUuid,
    pub collection_id: i32,
    pub timestamp: u64,
}

pub(crate) struct PendingWrite {
    pub(crate) object_id: ObjectUuid,
    pub(crate) collection_id: i32,
}

pub(crate) struct OutboundMessage {
    pub(crate) object_id: ObjectUuid,
    pub(crate) collection_id: i32,
    pub(crate) field_id: i32,
    pub(crate) message_data: MemoryAccessor,
}

/// Outbound state shared between the reconciler and its collections:
/// dirty-object queue plus the message arena. Arena windows stay valid
/// until the post-flush reset because the pool itself is never reallocated.
pub struct ReconcilerOutbox {
    pending_writes: Vec<PendingWrite>,
    messages: Vec<OutboundMessage>,
    message_pool: Box<[u8]>,
    message_pool_pos: i32,
}

pub type OutboxHandle = Rc<RefCell<ReconcilerOutbox>>;

impl ReconcilerOutbox {
    pub(crate) fn new(message_pool_size: i32) -> OutboxHandle {
        Rc::new(RefCell::new(Self {
            pending_writes: Vec::new(),
            messages: Vec::new(),
            message_pool: vec![0u8; message_pool_size.max(0) as usize].into_boxed_slice(),
            message_pool_pos: 0,
        }))
    }

    /// Queue an object for the next outbound flush, deduping only against
    /// the most recent entry so the flush order stays first-notified.
    pub fn notify_object_needs_write(&mut self, object_id: ObjectUuid, collection_id: i32) {
        if let Some(last) = self.pending_writes.last() {
            if last.collection_id == collection_id && last.object_id == object_id {
                return;
            }
        }
        self.pending_writes.push(PendingWrite {
            object_id,
            collection_id,
        });
    }

    /// Carve a message payload window out of the arena and record the
    /// pending message. The arena is sized once at reconciler
    /// construction; overflow is a precondition violation.
    pub fn send_message(
        &mut self,
        object_id: ObjectUuid,
        collection_id: i32,
        field_id: i32,
        num_bytes: i32,
    ) -> MemoryAccessor {
        assert!(
            self.message_pool_pos + num_bytes <= self.message_pool.len() as i32,
            "outbound message arena overflow ({} + {num_bytes} > {})",
            self.message_pool_pos,
            self.message_pool.len()
        );

        let message_data = if num_bytes > 0 {
            let window = unsafe {
                MemoryAccessor::new(self.message_pool.as_mut_ptr(), self.message_pool_pos, num_bytes)
            };
            self.message_pool_pos += num_bytes;
            window
        } else {
            MemoryAccessor::null()
        };

        self.messages.push(OutboundMessage {
            object_id,
            collection_id,
            field_id,
            message_data,
        });
        message_data
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        !self.pending_writes.is_empty()
    }

    pub(crate) fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub(crate) fn take_pending_writes(&mut self) -> Vec<PendingWrite> {
        std::mem::take(&mut self.pending_writes)
    }

    pub(crate) fn replace_pending_writes(&mut self, writes: Vec<PendingWrite>) {
        self.pending_writes = writes;
    }

    pub(crate) fn take_messages(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.messages)
    }

    pub(crate) fn reset_message_pool(&mut self) {
        self.message_pool_pos = 0;
    }
}

/// Cheap handle for sending messages addressed to one collection without
/// borrowing the collection itself. Object tick code uses this; going
/// through the collection would re-enter its RefCell during ticks.
#[derive(Clone)]
pub struct MessageSender {
    outbox: OutboxHandle,
    collection_id: i32,
}

impl MessageSender {
    pub(crate) fn new(outbox: OutboxHandle, collection_id: i32) -> Self {
        Self {
            outbox,
            collection_id,
        }
    }

    /// Allocate a message payload window; the caller fills it in before
    /// the next outbound tick flushes it.
    pub fn send_message(
        &self,
        object_id: ObjectUuid,
        field_id: i32,
        num_bytes: i32,
    ) -> MemoryAccessor {
        self.outbox
            .borrow_mut()
            .send_message(object_id, self.collection_id, field_id, num_bytes)
    }

    /// Mark an object dirty for the next outbound flush.
    pub fn notify_object_needs_write(&self, object_id: ObjectUuid) {
        self.outbox
            .borrow_mut()
            .notify_object_needs_write(object_id, self.collection_id)
    }
}

/// Lifecycle dispatch surface a collection exposes to the reconciler.
/// Implemented by `ObjectCollection`; the reconciler only sees this trait,
/// keyed by collection id.
pub trait ObjectCollectionInterface {
    fn collection_id(&self) -> i32;
    fn is_local_owned(&self) -> bool;

    /// Per-object polling on the outbound tick.
    fn tick(&mut self);

    /// Write a queued object's creates/updates, or its delete if the
    /// object is gone.
    fn write_changes(&mut self, accessor: &mut TransportStreamAccessor, id: ObjectUuid);

    /// Enumerate objects (with creation timestamps) for a full update.
    fn prep_full_update(&mut self, entries: &mut Vec<FullUpdateEntry>);

    fn process_create(&mut self, id: ObjectUuid, mem: MemoryAccessor);
    fn process_update(&mut self, id: ObjectUuid, mem: MemoryAccessor, fields_changed: u64) -> bool;
    fn process_delete(&mut self, id: ObjectUuid);
    fn process_message(
        &mut self,
        id: ObjectUuid,
        field_id: i32,
        timestamp_us: u64,
        mem: MemoryAccessor,
    );

    /// Create-or-update during a full update run.
    fn process_upsert(&mut self, id: ObjectUuid, mem: MemoryAccessor);

    /// Delete every remote object whose id was not part of the full
    /// update.
    fn process_full_reconcile(&mut self, reconciled_ids: &HashSet<ObjectUuid>);

    /// Peer shut down: tear down all remote objects.
    fn process_shutdown(&mut self);
}

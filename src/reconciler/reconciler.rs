// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Maps changelog traffic onto object collections: inbound events become
// local lifecycle calls, local dirty objects and buffered messages become
// outbound events. Recovers from changelog overflow through the
// RequestFullUpdate / FullUpdate handshake.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::warn;

use crate::reconciler::change_types::{
    CollectionChangeEventAccessor, CollectionChangeType, CollectionMessageChangeEventAccessor,
    CollectionUpdateChangeEventAccessor,
};
use crate::reconciler::interfaces::{
    FullUpdateEntry, ObjectCollectionInterface, OutboxHandle, PendingWrite, ReconcilerOutbox,
};
use crate::accessor::MemoryAccessor;
use crate::time::current_clock_micros;
use crate::transport::{
    ChangeEvent, ChangeEventAccessor, TransportStream, TransportStreamAccessor,
    TransportStreamIterator, TRANSACT_TIMEOUT,
};
use crate::types::ObjectUuid;

const DEFAULT_MESSAGE_LIFETIME: Duration = Duration::from_secs(5);

type CollectionHandle = Rc<RefCell<dyn ObjectCollectionInterface>>;

pub struct DataStoreReconciler {
    inbound: Weak<TransportStream>,
    outbound: Weak<TransportStream>,
    inbound_iterator: TransportStreamIterator,

    collections: HashMap<i32, CollectionHandle>,
    outbox: OutboxHandle,

    message_lifetime_us: u64,

    // A fresh reconciler announces its full local state on the first
    // outbound tick so late-joining peers converge immediately.
    pending_outbound_full_update: bool,
    request_inbound_full_update: bool,
    waiting_for_inbound_full_update: bool,
}

impl DataStoreReconciler {
    pub fn new(
        inbound: &Rc<TransportStream>,
        outbound: &Rc<TransportStream>,
        message_pool_size: i32,
    ) -> Self {
        Self {
            inbound: Rc::downgrade(inbound),
            outbound: Rc::downgrade(outbound),
            inbound_iterator: inbound.create_iterator(),
            collections: HashMap::new(),
            outbox: ReconcilerOutbox::new(message_pool_size),
            message_lifetime_us: DEFAULT_MESSAGE_LIFETIME.as_micros() as u64,
            pending_outbound_full_update: true,
            request_inbound_full_update: false,
            waiting_for_inbound_full_update: false,
        }
    }

    /// Inbound messages older than this at dispatch time are silently
    /// dropped, so a late-starting reader does not replay stale traffic.
    pub fn set_message_lifetime(&mut self, lifetime: Duration) {
        self.message_lifetime_us = lifetime.as_micros() as u64;
    }

    /// Store a collection under its id. Called once per collection during
    /// data store construction.
    pub fn register_collection(&mut self, collection: CollectionHandle) {
        let collection_id = collection.borrow().collection_id();
        self.collections.entry(collection_id).or_insert(collection);
    }

    /// The shared outbound queue; collections hold a clone.
    pub fn outbox_handle(&self) -> OutboxHandle {
        self.outbox.clone()
    }

    /// Allocate an outbound message payload window addressed to
    /// `(collection_id, object_id, field_id)`.
    pub fn send_message(
        &self,
        object_id: ObjectUuid,
        collection_id: i32,
        field_id: i32,
        num_bytes: i32,
    ) -> MemoryAccessor {
        self.outbox
            .borrow_mut()
            .send_message(object_id, collection_id, field_id, num_bytes)
    }

    /// Queue an object for the next outbound flush.
    pub fn notify_object_needs_write(&self, object_id: ObjectUuid, collection_id: i32) {
        self.outbox
            .borrow_mut()
            .notify_object_needs_write(object_id, collection_id)
    }

    /// Drain inbound events into collection calls. Fast-paths out with a
    /// single lock-free header read when there is nothing new.
    pub fn tick_inbound(&mut self) {
        let Some(inbound) = self.inbound.upgrade() else {
            return;
        };

        if !self.inbound_iterator.needs_processing() {
            return;
        }

        let did_lock = inbound.transact(TRANSACT_TIMEOUT, |accessor| {
            self.reconcile_inbound_changes(accessor);
        });
        if !did_lock {
            // non-fatal; retried on the next tick
            warn!("inbound reconcile skipped: transact lock timed out");
        }
    }

    /// Tick collections, then flush pending writes and messages. Emits an
    /// empty heartbeat transaction when there is nothing to send but the
    /// header is going stale.
    pub fn tick_outbound(&mut self) {
        let Some(outbound) = self.outbound.upgrade() else {
            return;
        };

        for collection in self.collections.values() {
            collection.borrow_mut().tick();
        }

        let (has_messages, has_writes) = {
            let outbox = self.outbox.borrow();
            (outbox.has_messages(), outbox.has_pending_writes())
        };
        let has_changes =
            self.request_inbound_full_update || self.pending_outbound_full_update || has_writes;

        if !has_changes && !has_messages {
            if outbound.needs_heartbeat() {
                outbound.transact(TRANSACT_TIMEOUT, |_| {});
            }
            return;
        }

        let did_lock = outbound.transact(TRANSACT_TIMEOUT, |accessor| {
            self.reconcile_outbound_changes(accessor);
        });
        if !did_lock {
            warn!("outbound reconcile skipped: transact lock timed out");
        }
    }

    /// Best-effort shutdown: emit a single Shutdown event (skipped if the
    /// lock is busy; peers notice via expiry) and drop the transport refs.
    pub fn shutdown(&mut self) {
        if let Some(outbound) = self.outbound.upgrade() {
            outbound.transact(TRANSACT_TIMEOUT, |accessor| {
                accessor.write_change_event::<ChangeEventAccessor>(
                    CollectionChangeType::Shutdown as i32,
                    0,
                    0,
                );
            });
        }
        self.inbound = Weak::new();
        self.outbound = Weak::new();
    }

    /// Queue a retransmission of every locally owned object, in creation
    /// order, bracketed by a FullUpdate marker on the next outbound tick.
    pub fn send_full_update(&mut self) {
        self.pending_outbound_full_update = true;

        let mut entries: Vec<FullUpdateEntry> = Vec::new();
        for collection in self.collections.values() {
            collection.borrow_mut().prep_full_update(&mut entries);
        }
        entries.sort_by_key(|entry| entry.timestamp);

        let writes = entries
            .into_iter()
            .map(|entry| PendingWrite {
                object_id: entry.object_id,
                collection_id: entry.collection_id,
            })
            .collect();
        self.outbox.borrow_mut().replace_pending_writes(writes);
    }

    fn reconcile_inbound_changes(&mut self, accessor: &mut TransportStreamAccessor) {
        if self.inbound_iterator.has_missed_entries(accessor) {
            // More events arrived between ticks than the changelog holds.
            // Ask the peer to resend everything and drop events until the
            // FullUpdate boundary arrives.
            warn!("inbound changelog overran; requesting full update");
            self.request_inbound_full_update = true;
            self.waiting_for_inbound_full_update = true;
            return;
        }

        let oldest_message_timestamp =
            current_clock_micros().saturating_sub(self.message_lifetime_us);
        let mut in_full_update = false;
        let mut reconciled_ids: HashSet<ObjectUuid> = HashSet::new();

        loop {
            let entry_mem = self.inbound_iterator.get_next_entry(accessor);
            if entry_mem.is_null() {
                break;
            }

            let raw_type = ChangeEventAccessor::new(entry_mem).change_type();
            let Some(change_type) = CollectionChangeType::from_i32(raw_type) else {
                warn!("skipping change event with unknown type {raw_type}");
                continue;
            };

            if change_type == CollectionChangeType::RequestFullUpdate {
                self.send_full_update();
                continue;
            }

            if self.waiting_for_inbound_full_update
                && change_type != CollectionChangeType::FullUpdate
            {
                continue;
            }

            match change_type {
                CollectionChangeType::RequestFullUpdate => {}

                CollectionChangeType::FullUpdate => {
                    self.request_inbound_full_update = false;
                    self.waiting_for_inbound_full_update = false;
                    in_full_update = true;
                }

                CollectionChangeType::Shutdown => {
                    for collection in self.collections.values() {
                        collection.borrow_mut().process_shutdown();
                    }
                }

                CollectionChangeType::CreateObject => {
                    let entry = CollectionChangeEventAccessor::new(entry_mem);
                    let id = entry.object_id();
                    if let Some(collection) = self.collections.get(&entry.collection_id()) {
                        if in_full_update {
                            collection.borrow_mut().process_upsert(id, entry.access_change_data());
                            reconciled_ids.insert(id);
                        } else {
                            collection.borrow_mut().process_create(id, entry.access_change_data());
                        }
                    }
                }

                CollectionChangeType::UpdateObject => {
                    let entry = CollectionUpdateChangeEventAccessor::new(entry_mem);
                    let base = entry.collection_event();
                    if let Some(collection) = self.collections.get(&base.collection_id()) {
                        collection.borrow_mut().process_update(
                            base.object_id(),
                            entry.access_change_data(),
                            entry.fields_changed(),
                        );
                    }
                }

                CollectionChangeType::DeleteObject => {
                    let entry = CollectionChangeEventAccessor::new(entry_mem);
                    if let Some(collection) = self.collections.get(&entry.collection_id()) {
                        collection.borrow_mut().process_delete(entry.object_id());
                    }
                }

                CollectionChangeType::Message => {
                    let entry = CollectionMessageChangeEventAccessor::new(entry_mem);
                    let base = entry.collection_event();
                    let timestamp_us =
                        accessor.absolute_timestamp_us(base.base().timestamp_offset_ms());
                    if timestamp_us >= oldest_message_timestamp {
                        if let Some(collection) = self.collections.get(&base.collection_id()) {
                            collection.borrow_mut().process_message(
                                base.object_id(),
                                entry.field_id(),
                                timestamp_us,
                                entry.access_change_data(),
                            );
                        }
                    }
                    // older messages are dropped by design
                }
            }
        }

        if in_full_update {
            // anything not retransmitted no longer exists on the peer
            for collection in self.collections.values() {
                collection.borrow_mut().process_full_reconcile(&reconciled_ids);
            }
        }
    }

    fn reconcile_outbound_changes(&mut self, accessor: &mut TransportStreamAccessor) {
        if self.request_inbound_full_update {
            accessor.write_change_event::<ChangeEventAccessor>(
                CollectionChangeType::RequestFullUpdate as i32,
                0,
                0,
            );
            self.request_inbound_full_update = false;
        }

        if self.pending_outbound_full_update {
            accessor.write_change_event::<ChangeEventAccessor>(
                CollectionChangeType::FullUpdate as i32,
                0,
                0,
            );
            self.pending_outbound_full_update = false;
        }

        let pending_writes = self.outbox.borrow_mut().take_pending_writes();
        for write in &pending_writes {
            if let Some(collection) = self.collections.get(&write.collection_id) {
                collection.borrow_mut().write_changes(accessor, write.object_id);
            }
        }

        let messages = self.outbox.borrow_mut().take_messages();
        for message in &messages {
            let event = accessor.write_change_event::<CollectionMessageChangeEventAccessor>(
                CollectionChangeType::Message as i32,
                message.message_data.size(),
                0,
            );
            if event.is_null() {
                continue;
            }
            let base = event.collection_event();
            base.set_collection_id(message.collection_id);
            base.set_object_id(message.object_id);
            event.set_field_id(message.field_id);
            event.access_change_data().copy_from(&message.message_data);
        }
        self.outbox.borrow_mut().reset_message_pool();
    }
}

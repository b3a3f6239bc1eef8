// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport streams end to end: typed change events over the changelog,
// iterator catch-up and overflow detection, crash-safe locking, and the
// shared-memory region gate.

use std::time::Duration;

use mirrorbus::accessor::{MemoryAccessor, MemoryOffset};
use mirrorbus::reconciler::{
    CollectionChangeEventAccessor, CollectionChangeType, CollectionUpdateChangeEventAccessor,
};
use mirrorbus::transport::{
    format_stream_name, ChangeEvent, ChangeEventAccessor, TransportStream, TRANSACT_TIMEOUT,
};
use mirrorbus::types::{HashValue, ObjectUuid, TransportConfig};

fn test_config() -> TransportConfig {
    TransportConfig {
        schema_hash: HashValue::new(0x1122_3344_5566_7788, 2, 3, 4),
        changelog_byte_count: 8192,
    }
}

fn unique_name(prefix: &str) -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

// ---------------------------------------------------------------------------
// Hand-rolled object accessors standing in for generated schema code
// ---------------------------------------------------------------------------

struct FooTypeReader {
    mem: MemoryAccessor,
    read_pos: MemoryOffset,
}

impl FooTypeReader {
    const BYTE_COUNT: i32 = 8;

    fn new(mem: MemoryAccessor) -> Self {
        Self {
            mem,
            read_pos: MemoryOffset::default(),
        }
    }

    fn get_a(&mut self) -> i32 {
        self.mem.read_value(&mut self.read_pos)
    }

    fn get_b(&mut self) -> f32 {
        self.mem.read_value(&mut self.read_pos)
    }
}

struct FooTypeWriter {
    mem: MemoryAccessor,
    write_pos: MemoryOffset,
}

impl FooTypeWriter {
    fn create(
        accessor: &mut mirrorbus::transport::TransportStreamAccessor,
        collection_id: i32,
        id: ObjectUuid,
    ) -> Option<Self> {
        let event = accessor.write_change_event::<CollectionChangeEventAccessor>(
            CollectionChangeType::CreateObject as i32,
            FooTypeReader::BYTE_COUNT,
            0,
        );
        if event.is_null() {
            return None;
        }
        event.set_collection_id(collection_id);
        event.set_object_id(id);
        Some(Self {
            mem: event.access_change_data(),
            write_pos: MemoryOffset::default(),
        })
    }

    fn update(
        accessor: &mut mirrorbus::transport::TransportStreamAccessor,
        collection_id: i32,
        id: ObjectUuid,
        fields_changed: u64,
    ) -> Option<Self> {
        let event = accessor.write_change_event::<CollectionUpdateChangeEventAccessor>(
            CollectionChangeType::UpdateObject as i32,
            FooTypeReader::BYTE_COUNT,
            0,
        );
        if event.is_null() {
            return None;
        }
        let base = event.collection_event();
        base.set_collection_id(collection_id);
        base.set_object_id(id);
        event.set_fields_changed(fields_changed);
        Some(Self {
            mem: event.access_change_data(),
            write_pos: MemoryOffset::default(),
        })
    }

    fn set_a(&mut self, value: i32) {
        self.mem.write_value(value, &mut self.write_pos);
    }

    fn set_b(&mut self, value: f32) {
        self.mem.write_value(value, &mut self.write_pos);
    }
}

struct BarTypeReader {
    mem: MemoryAccessor,
    read_pos: MemoryOffset,
}

impl BarTypeReader {
    const C_BYTE_COUNT: i32 = 8;

    fn new(mem: MemoryAccessor) -> Self {
        Self {
            mem,
            read_pos: MemoryOffset::default(),
        }
    }

    fn get_c(&mut self) -> u64 {
        self.mem.read_value(&mut self.read_pos)
    }

    fn get_str(&mut self) -> String {
        self.mem.read_str(&mut self.read_pos)
    }
}

const FOO1_ID: ObjectUuid = ObjectUuid::new(0, 100);
const FOO2_ID: ObjectUuid = ObjectUuid::new(0, 200);
const BAR1_ID: ObjectUuid = ObjectUuid::new(1, 100);

#[test]
fn typed_events_round_trip() {
    let stream = TransportStream::heap(&unique_name("typed_events"), test_config()).unwrap();
    let mut reader_iter = stream.create_iterator();

    assert!(!reader_iter.needs_processing());

    // create foo1
    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        let mut foo1 = FooTypeWriter::create(writer, 0, FOO1_ID).unwrap();
        foo1.set_a(10);
        foo1.set_b(45.2);
    }));

    assert!(reader_iter.needs_processing());
    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        let entry = CollectionChangeEventAccessor::new(reader_iter.get_next_entry(reader));
        assert!(!entry.is_null());
        assert_eq!(entry.base().change_type(), CollectionChangeType::CreateObject as i32);
        assert_eq!(entry.object_id(), FOO1_ID);
        assert_eq!(entry.collection_id(), 0);
        let mut foo1 = FooTypeReader::new(entry.access_change_data());
        assert_eq!(foo1.get_a(), 10);
        assert!((foo1.get_b() - 45.2).abs() < 0.01);
    }));
    assert!(!reader_iter.needs_processing());

    // create bar1, with a variable-length string payload
    let text = "Hello";
    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        let event = writer.write_change_event::<CollectionChangeEventAccessor>(
            CollectionChangeType::CreateObject as i32,
            BarTypeReader::C_BYTE_COUNT + 4 + MemoryAccessor::dyn_size_of_str(text),
            0,
        );
        assert!(!event.is_null());
        event.set_collection_id(1);
        event.set_object_id(BAR1_ID);
        let data = event.access_change_data();
        let mut pos = MemoryOffset::default();
        data.write_value(15u64, &mut pos);
        data.write_str(text, &mut pos);
    }));

    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        let entry = CollectionChangeEventAccessor::new(reader_iter.get_next_entry(reader));
        assert!(!entry.is_null());
        assert_eq!(entry.base().change_type(), CollectionChangeType::CreateObject as i32);
        assert_eq!(entry.object_id(), BAR1_ID);
        assert_eq!(entry.collection_id(), 1);
        let mut bar1 = BarTypeReader::new(entry.access_change_data());
        assert_eq!(bar1.get_c(), 15);
        assert_eq!(bar1.get_str(), "Hello");
    }));

    // update foo2 after creating it; field mask travels with the event
    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        let mut foo2 = FooTypeWriter::create(writer, 0, FOO2_ID).unwrap();
        foo2.set_a(500);
        foo2.set_b(17.0);
        let mut upd = FooTypeWriter::update(writer, 0, FOO2_ID, 0b01).unwrap();
        upd.set_a(501);
        upd.set_b(17.0);
    }));

    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        let create = CollectionChangeEventAccessor::new(reader_iter.get_next_entry(reader));
        assert_eq!(create.base().change_type(), CollectionChangeType::CreateObject as i32);

        let update = CollectionUpdateChangeEventAccessor::new(reader_iter.get_next_entry(reader));
        assert_eq!(
            update.collection_event().base().change_type(),
            CollectionChangeType::UpdateObject as i32
        );
        assert_eq!(update.fields_changed(), 0b01);
        let mut foo2 = FooTypeReader::new(update.access_change_data());
        assert_eq!(foo2.get_a(), 501);

        // caught up
        assert!(reader_iter.get_next_entry(reader).is_null());
    }));
}

#[test]
fn events_in_one_transact_keep_write_order() {
    let stream = TransportStream::heap(&unique_name("event_order"), test_config()).unwrap();
    let mut iter = stream.create_iterator();

    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        for i in 0..10 {
            let event = writer.write_change_event::<CollectionChangeEventAccessor>(
                CollectionChangeType::CreateObject as i32,
                4,
                0,
            );
            let mut pos = MemoryOffset::default();
            event.access_change_data().write_value(i as i32, &mut pos);
        }
    }));

    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        for i in 0..10 {
            let entry = CollectionChangeEventAccessor::new(iter.get_next_entry(reader));
            let mut pos = MemoryOffset::default();
            assert_eq!(entry.access_change_data().read_value::<i32>(&mut pos), i);
        }
    }));
}

#[test]
fn overflowed_reader_reports_missed_entries() {
    let config = TransportConfig {
        schema_hash: test_config().schema_hash,
        changelog_byte_count: 512,
    };
    let stream = TransportStream::heap(&unique_name("overflow"), config).unwrap();
    let mut iter = stream.create_iterator();

    // one event the reader never picks up, then enough traffic to evict it
    for round in 0..64 {
        assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
            let event = writer.write_change_event::<CollectionChangeEventAccessor>(
                CollectionChangeType::UpdateObject as i32,
                16,
                0,
            );
            event.set_collection_id(round);
        }));
    }

    assert!(iter.needs_processing());
    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        assert!(iter.has_missed_entries(reader));
        // the miss snapped the cursor to the end; fresh events flow again
        assert!(iter.get_next_entry(reader).is_null());
    }));

    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        let event = writer.write_change_event::<CollectionChangeEventAccessor>(
            CollectionChangeType::CreateObject as i32,
            4,
            0,
        );
        event.set_collection_id(1234);
    }));
    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        assert!(!iter.has_missed_entries(reader));
        let entry = CollectionChangeEventAccessor::new(iter.get_next_entry(reader));
        assert_eq!(entry.collection_id(), 1234);
    }));
}

#[test]
fn prefilled_events_are_restamped_and_copied() {
    let stream = TransportStream::heap(&unique_name("prefilled"), test_config()).unwrap();
    let mut iter = stream.create_iterator();

    // stage an event outside the lock
    let mut staged = vec![0u64; 8];
    let staged_mem =
        unsafe { MemoryAccessor::new(staged.as_mut_ptr() as *mut u8, 0, 48) };
    let template = ChangeEventAccessor::new(staged_mem);
    template.set_change_type(CollectionChangeType::Message as i32);
    template.set_timestamp_offset_ms(-12345);
    let mut pos = MemoryOffset::new(8);
    staged_mem.write_value(0xfeedu64, &mut pos);

    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        writer.write_prefilled_change_event(staged_mem);
    }));

    assert!(stream.transact(TRANSACT_TIMEOUT, |reader| {
        let entry = ChangeEventAccessor::new(iter.get_next_entry(reader));
        assert_eq!(entry.change_type(), CollectionChangeType::Message as i32);
        // the staged timestamp was replaced at flush time
        assert!(entry.timestamp_offset_ms() >= 0);
        let mut pos = MemoryOffset::new(8);
        assert_eq!(entry.memory().read_value::<u64>(&mut pos), 0xfeed);
    }));
}

#[test]
fn oversized_event_write_is_a_noop() {
    let config = TransportConfig {
        schema_hash: test_config().schema_hash,
        changelog_byte_count: 128,
    };
    let stream = TransportStream::heap(&unique_name("oversized"), config).unwrap();
    let iter = stream.create_iterator();

    assert!(stream.transact(TRANSACT_TIMEOUT, |writer| {
        let event = writer.write_change_event::<CollectionChangeEventAccessor>(
            CollectionChangeType::CreateObject as i32,
            4096,
            0,
        );
        assert!(event.is_null());
    }));
    assert!(!iter.needs_processing());
}

#[test]
fn panicking_transact_releases_the_lock() {
    let stream = TransportStream::heap(&unique_name("panic_release"), test_config()).unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        stream.transact(TRANSACT_TIMEOUT, |writer| {
            let event = writer.write_change_event::<ChangeEventAccessor>(
                CollectionChangeType::FullUpdate as i32,
                0,
                0,
            );
            assert!(!event.is_null());
            panic!("simulated crash under the lock");
        });
    }));
    assert!(result.is_err());

    // the lock was released; the stream is still usable
    assert!(stream.transact(Duration::from_millis(100), |writer| {
        let event = writer.write_change_event::<ChangeEventAccessor>(
            CollectionChangeType::FullUpdate as i32,
            0,
            0,
        );
        assert!(!event.is_null());
    }));
}

#[test]
fn fresh_stream_does_not_need_heartbeat() {
    let stream = TransportStream::heap(&unique_name("heartbeat"), test_config()).unwrap();
    assert!(!stream.needs_heartbeat());
}

#[test]
fn stream_name_embeds_version_and_hash_prefix() {
    let name = format_stream_name("sensors", &test_config());
    assert_eq!(name, "sensors_v9_55667788");
}

#[cfg(unix)]
mod shared_memory {
    use super::*;

    #[test]
    fn two_handles_share_one_region() {
        let base = unique_name("shm_pair");
        let writer = TransportStream::shared_memory(&base, test_config()).unwrap();
        let reader = TransportStream::shared_memory(&base, test_config()).unwrap();
        let mut iter = reader.create_iterator();

        assert!(writer.transact(Duration::from_millis(100), |w| {
            let mut foo = FooTypeWriter::create(w, 0, FOO1_ID).unwrap();
            foo.set_a(77);
            foo.set_b(1.5);
        }));

        assert!(iter.needs_processing());
        assert!(reader.transact(Duration::from_millis(100), |r| {
            let entry = CollectionChangeEventAccessor::new(iter.get_next_entry(r));
            assert_eq!(entry.object_id(), FOO1_ID);
            let mut foo = FooTypeReader::new(entry.access_change_data());
            assert_eq!(foo.get_a(), 77);
        }));

        mirrorbus::ShmHandle::unlink_by_name(writer.name());
    }

    #[test]
    fn mismatched_schemas_open_disjoint_regions() {
        let base = unique_name("shm_schema");
        let config_a = test_config();
        let mut config_b = test_config();
        config_b.schema_hash.value0 = 0x9999;

        let stream_a = TransportStream::shared_memory(&base, config_a).unwrap();
        let stream_b = TransportStream::shared_memory(&base, config_b).unwrap();

        // different hash prefix, different region name: no aliasing
        assert_ne!(stream_a.name(), stream_b.name());

        mirrorbus::ShmHandle::unlink_by_name(stream_a.name());
        mirrorbus::ShmHandle::unlink_by_name(stream_b.name());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The memory-backed transport stream: a named region holding the versioned
// header plus the changelog, with a cross-process mutex as the sole write
// coordinator. Two backings share all of the logic: an owned heap buffer
// for same-process pairs, and a named OS shared memory region for the real
// cross-process case.

use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, error, info};

use crate::accessor::MemoryAccessor;
use crate::mutex::InterprocessMutex;
use crate::placed_ring::{PlacedRingBuffer, PlacedRingBufferIterator};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::transport::accessor::TransportStreamAccessor;
use crate::transport::header::{StreamHeaderAccessor, TRANSPORT_VERSION};
use crate::types::TransportConfig;

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL_US: u64 = 1_000_000;
const EXPIRE_TIME_US: u64 = 20_000_000;

/// Default timeout for reconciler-driven transactions. Failure to acquire
/// within this window is non-fatal; the caller retries on its next tick.
pub const TRANSACT_TIMEOUT: Duration = Duration::from_millis(1);

/// Shared-memory object name: base name tagged with the transport version
/// and a 32-bit prefix of the schema hash, so peers with incompatible
/// layouts open disjoint regions instead of fighting over one.
pub fn format_stream_name(base_name: &str, config: &TransportConfig) -> String {
    let hash_prefix = config.schema_hash.value0 as u32;
    format!("{base_name}_v{TRANSPORT_VERSION:x}_{hash_prefix:08x}")
}

enum TransportBacking {
    Heap { ptr: *mut u8, len_u64: usize },
    Shared(ShmHandle),
}

/// Per-transport iterator state handed to transact callbacks; iterators
/// downcast to it to reach the changelog.
pub(crate) struct MemoryStreamIteratorData {
    pub(crate) changelog: *mut PlacedRingBuffer,
}

/// A unidirectional event log over a memory region: one writer, many
/// readers, coordinated by a named mutex and three lock-free header
/// fields.
pub struct TransportStream {
    name: String,
    config: TransportConfig,
    mem_size: i32,
    mutex: InterprocessMutex,
    backing: TransportBacking,
    // handed to iterators so they can poll the header lock-free without
    // keeping the stream alive
    self_weak: Weak<TransportStream>,
}

impl TransportStream {
    /// Create a heap-backed stream for same-process pairs. Both endpoints
    /// share the one instance (and its process-local mutex) through `Rc`.
    pub fn heap(name: &str, config: TransportConfig) -> io::Result<Rc<Self>> {
        let mem_size = StreamHeaderAccessor::mem_size(&config);
        // u64 backing keeps the region 8-byte aligned for the placed
        // structs inside it
        let len_u64 = (mem_size as usize + 7) / 8;
        let boxed = vec![0u64; len_u64].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;

        let stream = Rc::new_cyclic(|self_weak| Self {
            name: name.to_string(),
            config,
            mem_size,
            mutex: InterprocessMutex::local(),
            backing: TransportBacking::Heap { ptr, len_u64 },
            self_weak: self_weak.clone(),
        });
        stream.initialize_memory(true)?;
        Ok(stream)
    }

    /// Open (or create) a named shared-memory stream. The embedded name
    /// carries the transport version and schema-hash prefix.
    pub fn shared_memory(base_name: &str, config: TransportConfig) -> io::Result<Rc<Self>> {
        let name = format_stream_name(base_name, &config);
        let mem_size = StreamHeaderAccessor::mem_size(&config);

        let shm = ShmHandle::acquire(&name, mem_size as usize, ShmOpenMode::CreateOrOpen)?;
        let did_create = shm.did_create();
        let mutex = InterprocessMutex::named(&name)?;

        let stream = Rc::new_cyclic(|self_weak| Self {
            name,
            config,
            mem_size,
            mutex,
            backing: TransportBacking::Shared(shm),
            self_weak: self_weak.clone(),
        });
        stream.initialize_memory(did_create)?;
        Ok(stream)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn region(&self) -> MemoryAccessor {
        let ptr = match &self.backing {
            TransportBacking::Heap { ptr, .. } => *ptr,
            TransportBacking::Shared(shm) => shm.as_mut_ptr(),
        };
        unsafe { MemoryAccessor::new(ptr, 0, self.mem_size) }
    }

    fn initialize_on_create(&self) -> io::Result<()> {
        let locked = self
            .mutex
            .lock_and_execute(INIT_TIMEOUT.as_millis() as u64, || {
                StreamHeaderAccessor::new(self.region()).initialize(&self.config);
            })?;
        if !locked {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("transport stream {}: init lock timed out", self.name),
            ));
        }
        Ok(())
    }

    fn initialize_memory(&self, did_create: bool) -> io::Result<()> {
        if did_create {
            return self.initialize_on_create();
        }

        let header = StreamHeaderAccessor::new(self.region());

        if header.base_timestamp() == 0 {
            // another process may be mid-initialization; taking the mutex
            // waits it out
            self.mutex
                .lock_and_execute(INIT_TIMEOUT.as_millis() as u64, || {})?;
            if header.base_timestamp() == 0 {
                // nobody finished the job; claim the region
                return self.initialize_on_create();
            }
        }

        let version = header.transport_version();

        if version < TRANSPORT_VERSION {
            // pre-heartbeat layout, no liveness to check
            info!(
                "transport stream {}: version {version} too old, reinitializing",
                self.name
            );
            return self.initialize_on_create();
        }

        if header.last_update_age_us() > EXPIRE_TIME_US {
            info!("transport stream {}: region expired, reinitializing", self.name);
            return self.initialize_on_create();
        }

        if version != TRANSPORT_VERSION {
            error!(
                "transport stream {}: version mismatch ({version} != {TRANSPORT_VERSION}) on a live region",
                self.name
            );
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "transport version mismatch",
            ));
        }

        if header.schema_hash() != self.config.schema_hash {
            error!("transport stream {}: schema hash mismatch on a live region", self.name);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "schema hash mismatch",
            ));
        }

        Ok(())
    }

    /// Run `func` with the stream locked, handing it an accessor that
    /// appends change events to the changelog. Returns false if the lock
    /// was not acquired within `timeout`.
    pub fn transact<F: FnOnce(&mut TransportStreamAccessor)>(
        &self,
        timeout: Duration,
        func: F,
    ) -> bool {
        let region = self.region();
        let result = self
            .mutex
            .lock_and_execute(timeout.as_millis() as u64, || {
                let header = StreamHeaderAccessor::new(region);
                let base_timestamp = header.base_timestamp();
                let changelog = header.changelog_ptr();

                let mut iter_data = MemoryStreamIteratorData { changelog };
                let mut allocate = |num_bytes: i32| -> MemoryAccessor {
                    let mut change_id = 0;
                    let mem =
                        unsafe { &mut *changelog }.push(num_bytes, Some(&mut change_id));
                    if !mem.is_null() {
                        header.set_last_changelog_id(change_id);
                    }
                    mem
                };

                let mut accessor =
                    TransportStreamAccessor::new(base_timestamp, &mut iter_data, &mut allocate);
                func(&mut accessor);

                header.set_last_update_timestamp();
            });

        match result {
            Ok(locked) => {
                if !locked {
                    debug!("transport stream {}: transact lock timed out", self.name);
                }
                locked
            }
            Err(e) => {
                error!("transport stream {}: transact failed: {e}", self.name);
                false
            }
        }
    }

    /// Lock-free check: has more than the heartbeat interval passed since
    /// the last write? The writer answers by emitting an empty transaction.
    pub fn needs_heartbeat(&self) -> bool {
        StreamHeaderAccessor::new(self.region()).last_update_age_us() > HEARTBEAT_INTERVAL_US
    }

    /// A reader cursor over this stream's changelog.
    pub fn create_iterator(&self) -> TransportStreamIterator {
        TransportStreamIterator {
            stream: self.self_weak.clone(),
            iter: PlacedRingBufferIterator::new(),
        }
    }
}

impl Drop for TransportStream {
    fn drop(&mut self) {
        if let TransportBacking::Heap { ptr, len_u64 } = &self.backing {
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    *ptr as *mut u64,
                    *len_u64,
                )));
            }
        }
    }
}

/// Reader cursor bound to one stream. `needs_processing` is a lock-free
/// poll of the header; the entry-walking calls must run inside a
/// transact() on the same stream.
pub struct TransportStreamIterator {
    stream: Weak<TransportStream>,
    iter: PlacedRingBufferIterator,
}

impl TransportStreamIterator {
    /// Lock-free: compare the remembered read position against the
    /// header's last changelog id.
    pub fn needs_processing(&self) -> bool {
        let Some(stream) = self.stream.upgrade() else {
            return false;
        };
        let header = StreamHeaderAccessor::new(stream.region());
        self.iter.has_next_id(header.last_changelog_id())
    }

    /// True if unread events were evicted from the ring. Snaps the cursor
    /// to the end so the caller can recover via a full update.
    pub fn has_missed_entries(&mut self, accessor: &mut TransportStreamAccessor) -> bool {
        let Some(data) = accessor.iterator_data::<MemoryStreamIteratorData>() else {
            return false;
        };
        let changelog = unsafe { &*data.changelog };
        if self.iter.has_missed_entries(changelog) {
            self.iter.set_to_end(changelog);
            return true;
        }
        false
    }

    /// The next unread event, or a null accessor when caught up.
    pub fn get_next_entry(&mut self, accessor: &mut TransportStreamAccessor) -> MemoryAccessor {
        let Some(data) = accessor.iterator_data::<MemoryStreamIteratorData>() else {
            return MemoryAccessor::null();
        };
        let changelog = unsafe { &*data.changelog };
        self.iter.next(changelog)
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Collection-level change events carried in the changelog.
//
// Wire layout (little-endian, after the 8-byte event base):
//   collection events: [object_id: 2 x i64][collection_id: i32]
//   updates append     [fields_changed: u64]
//   messages append    [field_id: i32] (padded to 8)

use crate::accessor::{MemoryAccessor, MemoryOffset};
use crate::transport::{ChangeEvent, ChangeEventAccessor};
use crate::types::ObjectUuid;

/// Discriminant stored in the change event's type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CollectionChangeType {
    RequestFullUpdate = 0,
    FullUpdate = 1,
    Shutdown = 2,
    CreateObject = 3,
    DeleteObject = 4,
    UpdateObject = 5,
    Message = 6,
}

impl CollectionChangeType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::RequestFullUpdate),
            1 => Some(Self::FullUpdate),
            2 => Some(Self::Shutdown),
            3 => Some(Self::CreateObject),
            4 => Some(Self::DeleteObject),
            5 => Some(Self::UpdateObject),
            6 => Some(Self::Message),
            _ => None,
        }
    }
}

const OBJECT_ID_OFFSET: i32 = ChangeEventAccessor::DS_SIZE;
const COLLECTION_ID_OFFSET: i32 = OBJECT_ID_OFFSET + 16;

/// Create/delete events: base event plus object id and collection id.
pub struct CollectionChangeEventAccessor {
    mem: MemoryAccessor,
}

impl ChangeEvent for CollectionChangeEventAccessor {
    const DS_SIZE: i32 = ChangeEventAccessor::DS_SIZE + 20;

    fn from_memory(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    fn memory(&self) -> &MemoryAccessor {
        &self.mem
    }
}

impl CollectionChangeEventAccessor {
    pub fn new(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    pub fn base(&self) -> ChangeEventAccessor {
        ChangeEventAccessor::new(self.mem)
    }

    pub fn object_id(&self) -> ObjectUuid {
        let mut pos = MemoryOffset::new(OBJECT_ID_OFFSET);
        ObjectUuid::read_value(&self.mem, &mut pos)
    }

    pub fn set_object_id(&self, id: ObjectUuid) {
        let mut pos = MemoryOffset::new(OBJECT_ID_OFFSET);
        id.write_value(&self.mem, &mut pos);
    }

    pub fn collection_id(&self) -> i32 {
        let mut pos = MemoryOffset::new(COLLECTION_ID_OFFSET);
        self.mem.read_value(&mut pos)
    }

    pub fn set_collection_id(&self, collection_id: i32) {
        let mut pos = MemoryOffset::new(COLLECTION_ID_OFFSET);
        self.mem.write_value(collection_id, &mut pos);
    }

    pub fn access_change_data(&self) -> MemoryAccessor {
        self.mem.slice(Self::DS_SIZE)
    }
}

/// Update events add the 64-bit changed-fields mask.
pub struct CollectionUpdateChangeEventAccessor {
    mem: MemoryAccessor,
}

impl ChangeEvent for CollectionUpdateChangeEventAccessor {
    const DS_SIZE: i32 = CollectionChangeEventAccessor::DS_SIZE + 8;

    fn from_memory(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    fn memory(&self) -> &MemoryAccessor {
        &self.mem
    }
}

impl CollectionUpdateChangeEventAccessor {
    pub fn new(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    pub fn collection_event(&self) -> CollectionChangeEventAccessor {
        CollectionChangeEventAccessor::new(self.mem)
    }

    pub fn fields_changed(&self) -> u64 {
        let mut pos = MemoryOffset::new(CollectionChangeEventAccessor::DS_SIZE);
        self.mem.read_value(&mut pos)
    }

    pub fn set_fields_changed(&self, fields_changed: u64) {
        let mut pos = MemoryOffset::new(CollectionChangeEventAccessor::DS_SIZE);
        self.mem.write_value(fields_changed, &mut pos);
    }

    pub fn access_change_data(&self) -> MemoryAccessor {
        self.mem.slice(Self::DS_SIZE)
    }
}

/// Message events add the field id addressing the message endpoint on the
/// target object.
pub struct CollectionMessageChangeEventAccessor {
    mem: MemoryAccessor,
}

impl ChangeEvent for CollectionMessageChangeEventAccessor {
    const DS_SIZE: i32 = CollectionChangeEventAccessor::DS_SIZE + 8;

    fn from_memory(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    fn memory(&self) -> &MemoryAccessor {
        &self.mem
    }
}

impl CollectionMessageChangeEventAccessor {
    pub fn new(mem: MemoryAccessor) -> Self {
        Self { mem }
    }

    pub fn collection_event(&self) -> CollectionChangeEventAccessor {
        CollectionChangeEventAccessor::new(self.mem)
    }

    pub fn field_id(&self) -> i32 {
        let mut pos = MemoryOffset::new(CollectionChangeEventAccessor::DS_SIZE);
        self.mem.read_value(&mut pos)
    }

    pub fn set_field_id(&self, field_id: i32) {
        let mut pos = MemoryOffset::new(CollectionChangeEventAccessor::DS_SIZE);
        self.mem.write_value(field_id, &mut pos);
    }

    pub fn access_change_data(&self) -> MemoryAccessor {
        self.mem.slice(Self::DS_SIZE)
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport streams: named single-writer multi-reader event logs over a
// memory region, with a versioned header and a placed ring buffer
// changelog.

mod accessor;
mod header;
mod stream;

pub use accessor::{ChangeEvent, ChangeEventAccessor, TransportStreamAccessor};
pub use header::{StreamHeaderAccessor, HEADER_BYTE_COUNT, TRANSPORT_VERSION};
pub use stream::{
    format_stream_name, TransportStream, TransportStreamIterator, TRANSACT_TIMEOUT,
};

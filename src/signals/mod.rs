// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Audio-rate signal transport: typed multi-channel packets over the
// message path, with warm-up buffering on ingress and wall-clock pacing
// on egress.

mod forwarder;
mod inbound;
mod outbound;
mod packet;
mod ring;

pub use forwarder::InboundSignalForwarder;
pub use inbound::{InboundSignalData, InboundSignalDataInterface};
pub use outbound::OutboundSignalData;
pub use packet::{SampleType, SignalChannelData, SignalPacket, SignalSample};
pub use ring::SignalRingBuffer;

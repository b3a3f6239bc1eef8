// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fan-out sink: republishes received signal packets to any number of
// outbound signal senders, byte for byte, without reinterpreting samples.

use std::cell::RefCell;
use std::rc::Rc;

use super::inbound::InboundSignalDataInterface;
use super::outbound::OutboundSignalData;
use super::packet::{SampleType, SignalPacket};
use crate::accessor::MemoryAccessor;

#[derive(Default)]
pub struct InboundSignalForwarder {
    recipients: Vec<Rc<RefCell<OutboundSignalData>>>,
}

impl InboundSignalForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipient(&mut self, recipient: Rc<RefCell<OutboundSignalData>>) {
        self.recipients.push(recipient);
    }
}

impl InboundSignalDataInterface for InboundSignalForwarder {
    fn on_signal_data(&mut self, _timestamp_us: u64, mem: &MemoryAccessor) {
        let inbound = SignalPacket::new(*mem);
        let frame_count = inbound.frame_count();
        let sample_type = inbound.sample_type();
        let num_channels = inbound.num_channels();
        let frame_rate = inbound.frame_rate();

        let sample_size = SampleType::from_i32(sample_type)
            .map(|t| t.sample_size())
            .unwrap_or(4);

        for recipient in &self.recipients {
            let outbound = recipient.borrow_mut().send_signal_packet(
                sample_size,
                frame_count,
                sample_type,
                num_channels,
                frame_rate,
            );
            if !outbound.is_null() {
                outbound.copy_channel_data_from(&inbound);
            }
        }
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Signal egress: packs frames into signal packets and sends them as
// messages, paced against wall-clock time so the stream carries exactly
// the frame rate it advertises. The next-packet deadline advances by the
// packet duration rather than resetting to now, so timing error does not
// accumulate across ticks.

use std::rc::Rc;
use std::time::{Duration, Instant};

use super::packet::{SampleType, SignalChannelData, SignalPacket, SignalSample};
use super::ring::SignalRingBuffer;
use crate::reconciler::MessageSender;
use crate::types::ObjectUuid;

type PacketFiller = Box<dyn FnMut(&mut SignalPacket, i32, u64)>;

pub struct OutboundSignalData {
    id: ObjectUuid,
    sender: Option<MessageSender>,
    field_id: i32,

    // fills a freshly allocated packet; (packet, frames_per_second,
    // start_frame)
    signal_source: Option<PacketFiller>,
    sample_type: SampleType,
    sample_size: i32,
    num_channels: i32,
    frames_per_second: i32,
    frames_per_packet: i32,

    cur_read_pos: u64,
    next_packet_deadline: Option<Instant>,
}

impl Default for OutboundSignalData {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundSignalData {
    pub fn new() -> Self {
        Self {
            id: ObjectUuid::default(),
            sender: None,
            field_id: 0,
            signal_source: None,
            sample_type: SampleType::F32,
            sample_size: 4,
            num_channels: 1,
            frames_per_second: 0,
            frames_per_packet: 1024,
            cur_read_pos: 0,
            next_packet_deadline: None,
        }
    }

    /// Address outgoing packets to `(object, field)` through the given
    /// collection's message sender.
    pub fn set_recipient(&mut self, id: ObjectUuid, sender: MessageSender, field_id: i32) {
        self.id = id;
        self.sender = Some(sender);
        self.field_id = field_id;
    }

    /// Pull-callback source: invoked once per packet with the channel
    /// view, the frame rate, and the absolute start frame.
    pub fn set_signal_source<T, F>(
        &mut self,
        mut source: F,
        num_channels: i32,
        frames_per_second: i32,
        frames_per_packet: i32,
    ) where
        T: SignalSample,
        F: FnMut(SignalChannelData<T>, i32, u64) + 'static,
    {
        self.signal_source = Some(Box::new(
            move |packet: &mut SignalPacket, fps: i32, start_frame: u64| {
                source(packet.access_channel_data::<T>(), fps, start_frame);
            },
        ));
        self.configure::<T>(num_channels, frames_per_second, frames_per_packet);
    }

    /// Ring-buffer source: each packet drains `frames_per_packet` frames,
    /// with silence on underflow.
    pub fn set_ring_buffer_source<T: SignalSample>(
        &mut self,
        ring_buffer: Rc<SignalRingBuffer<T>>,
        num_channels: i32,
        frames_per_second: i32,
        frames_per_packet: i32,
    ) {
        self.signal_source = Some(Box::new(
            move |packet: &mut SignalPacket, _fps: i32, _start_frame: u64| {
                packet
                    .access_channel_data::<T>()
                    .consume_from_ring_buffer(&ring_buffer);
            },
        ));
        self.configure::<T>(num_channels, frames_per_second, frames_per_packet);
    }

    fn configure<T: SignalSample>(
        &mut self,
        num_channels: i32,
        frames_per_second: i32,
        frames_per_packet: i32,
    ) {
        self.sample_type = T::SAMPLE_TYPE;
        self.sample_size = T::SIZE;
        self.num_channels = num_channels;
        self.frames_per_second = frames_per_second;
        self.frames_per_packet = frames_per_packet;
        self.next_packet_deadline = Some(Instant::now());
    }

    /// Emit as many packets as wall-clock time has earned since the last
    /// tick. Driven at the module frame rate by the runner.
    pub fn tick(&mut self) {
        let now = Instant::now();
        loop {
            let frame_count = self.next_frame_count(now);
            if frame_count == 0 {
                break;
            }

            if self.signal_source.is_some() && self.sender.is_some() {
                let mut packet = self.alloc_packet(frame_count);
                if !packet.is_null() {
                    let fps = self.frames_per_second;
                    let start_frame = self.cur_read_pos;
                    if let Some(source) = self.signal_source.as_mut() {
                        source(&mut packet, fps, start_frame);
                    }
                }
            }

            self.cur_read_pos += frame_count as u64;
        }
    }

    /// Allocate and header-stamp one outgoing packet. The caller fills in
    /// the channel data.
    pub fn send_signal_packet(
        &mut self,
        sample_size: i32,
        frame_count: i32,
        sample_type: i32,
        num_channels: i32,
        frames_per_second: i32,
    ) -> SignalPacket {
        let Some(sender) = self.sender.as_ref() else {
            return SignalPacket::new(crate::accessor::MemoryAccessor::null());
        };
        let packet_size = SignalPacket::calc_packet_size(num_channels, sample_size, frame_count);
        let packet = SignalPacket::new(sender.send_message(self.id, self.field_id, packet_size));
        if !packet.is_null() {
            packet.set_frame_count(frame_count);
            packet.set_sample_type(sample_type);
            packet.set_num_channels(num_channels);
            packet.set_frame_rate(frames_per_second);
        }
        packet
    }

    fn alloc_packet(&mut self, frame_count: i32) -> SignalPacket {
        let (sample_size, sample_type, num_channels, fps) = (
            self.sample_size,
            self.sample_type as i32,
            self.num_channels,
            self.frames_per_second,
        );
        self.send_signal_packet(sample_size, frame_count, sample_type, num_channels, fps)
    }

    // Frames owed right now: a full packet once the deadline passes, else
    // nothing. The deadline advances by the emitted packet's duration.
    fn next_frame_count(&mut self, now: Instant) -> i32 {
        if self.frames_per_second == 0 {
            return 0;
        }
        let Some(deadline) = self.next_packet_deadline else {
            return 0;
        };

        let frame_count = if now < deadline {
            0
        } else {
            self.frames_per_packet
        };

        let advance_us = frame_count as u64 * 1_000_000 / self.frames_per_second as u64;
        self.next_packet_deadline = Some(deadline + Duration::from_micros(advance_us));

        frame_count
    }
}

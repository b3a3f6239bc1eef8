// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Signal ingress: receives signal packets as messages and buffers them in
// an interleaved ring with a warm-up threshold, so consumers read a
// steady stream despite packet jitter.

use std::rc::Rc;

use log::debug;

use super::packet::{SignalPacket, SignalSample};
use super::ring::SignalRingBuffer;
use crate::accessor::MemoryAccessor;

/// Sink for inbound signal packets. Objects route their signal message
/// fields here from `process_message`.
pub trait InboundSignalDataInterface {
    fn on_signal_data(&mut self, timestamp_us: u64, mem: &MemoryAccessor);
}

pub struct InboundSignalData<T: SignalSample> {
    ring_buffer: Rc<SignalRingBuffer<T>>,
    temp_data: Vec<T>,
    frames_per_second: i32,
    num_channels: i32,
}

impl<T: SignalSample> InboundSignalData<T> {
    /// The ring holds `max(2 * warmup, 1 second)` of frames; reads stall
    /// until `warmup_seconds` worth of frames have accumulated.
    pub fn new(num_channels: i32, frames_per_second: i32, warmup_seconds: f32) -> Self {
        let warmup_frames = (warmup_seconds * frames_per_second as f32) as usize;
        let max_frames_in_buffer = (warmup_frames * 2).max(frames_per_second as usize);
        Self {
            ring_buffer: Rc::new(SignalRingBuffer::new(
                max_frames_in_buffer,
                warmup_frames,
                num_channels as usize,
            )),
            temp_data: Vec::new(),
            frames_per_second,
            num_channels,
        }
    }

    pub fn read_frames_available(&self) -> usize {
        self.ring_buffer.read_frames_available()
    }

    pub fn read_interleaved(&self, output: &mut [T], frames_needed: usize) -> bool {
        self.ring_buffer.read_interleaved(output, frames_needed)
    }

    pub fn read_deinterleaved(
        &self,
        output: &mut [T],
        frames_needed: usize,
        output_stride: usize,
    ) -> bool {
        self.ring_buffer
            .read_deinterleaved(output, frames_needed, output_stride)
    }

    /// Shared handle to the underlying ring, e.g. for wiring into an
    /// outbound forwarding path.
    pub fn ring_buffer(&self) -> Rc<SignalRingBuffer<T>> {
        self.ring_buffer.clone()
    }
}

impl<T: SignalSample> InboundSignalDataInterface for InboundSignalData<T> {
    fn on_signal_data(&mut self, _timestamp_us: u64, mem: &MemoryAccessor) {
        let packet = SignalPacket::new(*mem);
        let sample_type = packet.sample_type();
        let frames_per_second = packet.frame_rate();

        if sample_type != T::SAMPLE_TYPE as i32 || frames_per_second != self.frames_per_second {
            // TODO: convert mismatched sample types and rates instead of
            // dropping the packet
            debug!(
                "dropping signal packet: sample type {sample_type} rate {frames_per_second} \
                 does not match sink"
            );
            return;
        }

        // clip to available capacity; overflowing frames are dropped
        let frame_count = (self.ring_buffer.write_frames_available() as i32)
            .min(packet.frame_count()) as usize;
        if frame_count == 0 {
            return;
        }

        let channels = self.num_channels as usize;
        let channel_data = packet.access_channel_data::<T>();
        self.temp_data.resize(frame_count * channels, T::default());
        for channel in 0..channels {
            // interleave by writing each channel at its offset with the
            // channel count as stride
            channel_data.read_channel_data(
                channel as i32,
                &mut self.temp_data[channel..],
                frame_count,
                channels,
            );
        }

        self.ring_buffer.write_interleaved(&self.temp_data, frame_count);
    }
}

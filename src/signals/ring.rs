// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Interleaved sample ring buffer bridging signal ingress (reconciler
// thread) and consumption (often an audio callback thread). Warm-up keeps
// a cushion of frames before the first read so jittery producers do not
// immediately underflow; an underflow re-enters warm-up.

use std::sync::Mutex;

use super::packet::SignalSample;

struct RingState<T> {
    ring: Vec<T>, // interleaved samples
    read_pos: usize,
    write_pos: usize,
    stored_samples: usize,
    num_channels: usize,
    warmup_frame_count: usize,
    is_warming_up: bool,
}

impl<T: SignalSample> RingState<T> {
    // Frames the reader may take right now, after warm-up gating. Flags
    // an underflow when a read of `frames_needed` cannot be satisfied.
    fn gated_read_frames(&mut self, frames_needed: usize) -> (usize, bool) {
        let mut available = self.stored_samples / self.num_channels;
        let mut did_underflow = false;

        if self.is_warming_up {
            if available < self.warmup_frame_count {
                available = 0;
            } else {
                self.is_warming_up = false;
            }
        } else if available < frames_needed {
            self.is_warming_up = true;
            did_underflow = true;
        }

        (available.min(frames_needed), did_underflow)
    }

    fn advance_read(&mut self, samples: usize) {
        self.read_pos = (self.read_pos + samples) % self.ring.len();
        self.stored_samples -= samples;
    }
}

/// Mutex-guarded sample ring. All positions are in samples; a frame is
/// `num_channels` consecutive samples.
pub struct SignalRingBuffer<T> {
    state: Mutex<RingState<T>>,
}

impl<T: SignalSample> SignalRingBuffer<T> {
    pub fn new(frame_count: usize, warmup_frame_count: usize, num_channels: usize) -> Self {
        assert!(num_channels > 0 && frame_count > 0);
        Self {
            state: Mutex::new(RingState {
                ring: vec![T::default(); frame_count * num_channels],
                read_pos: 0,
                write_pos: 0,
                stored_samples: 0,
                num_channels,
                warmup_frame_count,
                is_warming_up: true,
            }),
        }
    }

    pub fn read_frames_available(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.stored_samples / state.num_channels
    }

    pub fn write_frames_available(&self) -> usize {
        let state = self.state.lock().unwrap();
        (state.ring.len() - state.stored_samples) / state.num_channels
    }

    /// Read `frames_needed` interleaved frames into `output`. Returns
    /// false on underflow; missing samples are back-filled with zeros and
    /// the ring re-enters warm-up.
    pub fn read_interleaved(&self, output: &mut [T], frames_needed: usize) -> bool {
        let mut state = self.state.lock().unwrap();

        let (frames_from_ring, did_underflow) = state.gated_read_frames(frames_needed);

        let ring_samples = frames_from_ring * state.num_channels;
        let total_samples = frames_needed * state.num_channels;
        debug_assert!(output.len() >= total_samples);

        let ring_size = state.ring.len();
        for (i, out) in output[..ring_samples].iter_mut().enumerate() {
            *out = state.ring[(state.read_pos + i) % ring_size];
        }
        state.advance_read(ring_samples);

        for sample in &mut output[ring_samples..total_samples] {
            *sample = T::default();
        }

        !did_underflow
    }

    /// Read `frames_needed` frames deinterleaved: channel `c`, frame `f`
    /// lands at `output[c * output_stride + f]`. Same warm-up, underflow
    /// and zero-fill semantics as `read_interleaved`.
    pub fn read_deinterleaved(
        &self,
        output: &mut [T],
        frames_needed: usize,
        output_stride: usize,
    ) -> bool {
        let mut state = self.state.lock().unwrap();

        let (frames_from_ring, did_underflow) = state.gated_read_frames(frames_needed);

        let num_channels = state.num_channels;
        debug_assert!(output_stride >= frames_needed);
        debug_assert!(output.len() >= num_channels * output_stride);

        let ring_size = state.ring.len();
        for frame in 0..frames_from_ring {
            for channel in 0..num_channels {
                let sample =
                    state.ring[(state.read_pos + frame * num_channels + channel) % ring_size];
                output[channel * output_stride + frame] = sample;
            }
        }
        state.advance_read(frames_from_ring * num_channels);

        for channel in 0..num_channels {
            for frame in frames_from_ring..frames_needed {
                output[channel * output_stride + frame] = T::default();
            }
        }

        !did_underflow
    }

    /// Write interleaved frames; returns how many frames actually fit.
    /// Overflowing frames are dropped.
    pub fn write_interleaved(&self, input: &[T], frames_to_write: usize) -> usize {
        let mut state = self.state.lock().unwrap();

        let writable_frames = ((state.ring.len() - state.stored_samples) / state.num_channels)
            .min(frames_to_write);
        let ring_samples = writable_frames * state.num_channels;
        debug_assert!(input.len() >= ring_samples);

        let ring_size = state.ring.len();
        let write_pos = state.write_pos;
        for (i, sample) in input[..ring_samples].iter().enumerate() {
            let at = (write_pos + i) % ring_size;
            state.ring[at] = *sample;
        }
        state.write_pos = (write_pos + ring_samples) % ring_size;
        state.stored_samples += ring_samples;

        writable_frames
    }
}

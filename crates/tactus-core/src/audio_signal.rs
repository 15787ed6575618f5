//! Audio signals: a stream of canonical sample buffers owned by a recycling.

use crate::format::{PcmBuffer, SoundFormat};
use crate::{ContextId, RecallId, RecyclingId, SignalId};
use serde::{Deserialize, Serialize};

/// Samplerate, buffer size and storage format of a recycling or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalParams {
    pub samplerate: u32,
    pub buffer_size: usize,
    pub format: SoundFormat,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            samplerate: 44100,
            buffer_size: 512,
            format: SoundFormat::default(),
        }
    }
}

/// Frame positions that shape how a signal is laid out from its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalTiming {
    /// Buffers of silence before the first frame.
    pub delay: usize,
    /// Frame offset inside the first non-delayed buffer.
    pub attack: usize,
    /// Loop region in frames; `loop_end == 0` disables looping.
    pub loop_start: usize,
    pub loop_end: usize,
}

/// One stream of buffers produced or consumed for a single `(Recycling, RecallId)` pair.
#[derive(Debug, Clone)]
pub struct AudioSignal {
    id: SignalId,
    recycling: RecyclingId,
    recall_id: Option<RecallId>,
    context: Option<ContextId>,
    params: SignalParams,
    timing: SignalTiming,
    stream: Vec<Vec<f64>>,
    current: usize,
    frame_count: usize,
    last_frame: usize,
    template: bool,
    end_of_stream: bool,
}

impl AudioSignal {
    /// Template signal of a recycling: holds the source material, never runs.
    pub fn template(recycling: RecyclingId, params: SignalParams) -> Self {
        let mut signal = Self::blank(recycling, params);
        signal.template = true;
        signal.stream_resize(1);
        signal
    }

    /// Fresh signal tagged to a recall id and its context.
    pub fn tagged(
        recycling: RecyclingId,
        params: SignalParams,
        recall_id: RecallId,
        context: ContextId,
    ) -> Self {
        let mut signal = Self::blank(recycling, params);
        signal.recall_id = Some(recall_id);
        signal.context = Some(context);
        signal.stream_resize(1);
        signal
    }

    fn blank(recycling: RecyclingId, params: SignalParams) -> Self {
        Self {
            id: SignalId::next(),
            recycling,
            recall_id: None,
            context: None,
            params,
            timing: SignalTiming::default(),
            stream: Vec::new(),
            current: 0,
            frame_count: 0,
            last_frame: 0,
            template: false,
            end_of_stream: false,
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn recycling(&self) -> RecyclingId {
        self.recycling
    }

    pub fn recall_id(&self) -> Option<RecallId> {
        self.recall_id
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn params(&self) -> SignalParams {
        self.params
    }

    pub fn timing(&self) -> SignalTiming {
        self.timing
    }

    pub fn is_template(&self) -> bool {
        self.template
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Running signal that still has buffers ahead.
    pub fn is_active(&self) -> bool {
        !self.template && !self.end_of_stream
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Frame offset of the last valid frame inside the final buffer.
    pub fn last_frame(&self) -> usize {
        self.last_frame
    }

    /// Number of buffers in the stream.
    pub fn length(&self) -> usize {
        self.stream.len()
    }

    /// Buffers already consumed before the current one.
    pub fn length_till_current(&self) -> usize {
        self.current.min(self.stream.len())
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&[f64]> {
        self.stream.get(self.current).map(|b| b.as_slice())
    }

    pub fn current_mut(&mut self) -> Option<&mut [f64]> {
        self.stream.get_mut(self.current).map(|b| b.as_mut_slice())
    }

    pub fn buffer(&self, index: usize) -> Option<&[f64]> {
        self.stream.get(index).map(|b| b.as_slice())
    }

    pub fn stream(&self) -> impl Iterator<Item = &[f64]> {
        self.stream.iter().map(|b| b.as_slice())
    }

    /// Grow with silent buffers or truncate to `length` buffers.
    pub fn stream_resize(&mut self, length: usize) {
        let buffer_size = self.params.buffer_size;
        self.stream.resize_with(length, || vec![0.0; buffer_size]);
        if self.current > self.stream.len() {
            self.current = self.stream.len();
        }
    }

    /// Append one silent buffer.
    pub fn add_stream(&mut self) {
        self.stream.push(vec![0.0; self.params.buffer_size]);
        self.end_of_stream = false;
    }

    /// Copy the template's buffers into this signal, shifted by the delay and attack.
    pub fn duplicate_stream(&mut self, template: &AudioSignal) {
        let buffer_size = self.params.buffer_size;
        let skip = self.timing.delay * buffer_size + self.timing.attack;
        let frames: Vec<f64> = template.stream.iter().flatten().copied().collect();
        let frames = &frames[..template.frame_count.min(frames.len())];

        let total = skip + frames.len();
        let buffers = total.div_ceil(buffer_size).max(1);
        self.stream = vec![vec![0.0; buffer_size]; buffers];
        for (i, sample) in frames.iter().enumerate() {
            let at = skip + i;
            self.stream[at / buffer_size][at % buffer_size] = *sample;
        }

        self.frame_count = frames.len();
        self.last_frame = total % buffer_size;
        self.current = 0;
        self.end_of_stream = false;
    }

    pub fn set_timing(&mut self, timing: SignalTiming) {
        self.timing = timing;
    }

    /// Move to the next buffer. Returns `false` once the stream is exhausted;
    /// a looping signal wraps back to its loop start instead.
    pub fn advance(&mut self) -> bool {
        if self.end_of_stream {
            return false;
        }
        self.current += 1;

        let buffer_size = self.params.buffer_size.max(1);
        if self.timing.loop_end > self.timing.loop_start {
            let loop_end = self.timing.loop_end.div_ceil(buffer_size);
            if self.current >= loop_end.min(self.stream.len()) {
                self.current = self.timing.loop_start / buffer_size;
            }
        }

        if self.current >= self.stream.len() {
            self.end_of_stream = true;
            return false;
        }
        true
    }

    pub fn rewind(&mut self) {
        self.current = 0;
        self.end_of_stream = false;
    }

    /// Fill the current buffer with silence.
    pub fn clear_current(&mut self) {
        if let Some(buffer) = self.current_mut() {
            buffer.fill(0.0);
        }
    }

    /// Apply new recycling parameters; buffers are resized, samples kept.
    pub fn apply_params(&mut self, params: SignalParams) {
        if params.buffer_size != self.params.buffer_size {
            for buffer in &mut self.stream {
                buffer.resize(params.buffer_size, 0.0);
            }
        }
        self.params = params;
    }

    /// Replace the stream with PCM in any storage format.
    pub fn import_pcm(&mut self, pcm: &PcmBuffer) {
        let buffer_size = self.params.buffer_size.max(1);
        let samples = pcm.to_canonical();
        self.frame_count = samples.len();
        self.stream = samples
            .chunks(buffer_size)
            .map(|chunk| {
                let mut buffer = chunk.to_vec();
                buffer.resize(buffer_size, 0.0);
                buffer
            })
            .collect();
        if self.stream.is_empty() {
            self.stream.push(vec![0.0; buffer_size]);
        }
        self.last_frame = self.frame_count % buffer_size;
        self.current = 0;
        self.end_of_stream = false;
    }

    /// Export the whole stream in the recycling's storage format.
    pub fn export_pcm(&self) -> PcmBuffer {
        let samples: Vec<f64> = self.stream.iter().flatten().copied().collect();
        PcmBuffer::from_canonical(&samples, self.params.format)
    }
}

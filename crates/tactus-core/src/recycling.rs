//! Recyclings: the per-channel owners of audio signals.
//!
//! The signal list is guarded by a short-lived lock. It is held for one list
//! mutation or one buffer operation, never across a whole stage.

use crate::audio_signal::{AudioSignal, SignalParams, SignalTiming};
use crate::context::RecyclingContext;
use crate::error::{RecallError, RecallResult};
use crate::format::PcmBuffer;
use crate::recall_id::RecallIdEntry;
use crate::{ChannelId, ContextId, RecallId, RecyclingId, SignalId};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
pub struct Recycling {
    id: RecyclingId,
    channel: ChannelId,
    params: Mutex<SignalParams>,
    template: Mutex<AudioSignal>,
    signals: Mutex<Vec<AudioSignal>>,
}

impl Recycling {
    pub fn new(channel: ChannelId, params: SignalParams) -> Arc<Self> {
        let id = RecyclingId::next();
        Arc::new(Self {
            id,
            channel,
            params: Mutex::new(params),
            template: Mutex::new(AudioSignal::template(id, params)),
            signals: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> RecyclingId {
        self.id
    }

    /// Channel that created this recycling.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn params(&self) -> SignalParams {
        *self.params.lock()
    }

    /// Propagate new samplerate, buffer size or format to the template and
    /// every signal.
    pub fn set_params(&self, params: SignalParams) {
        *self.params.lock() = params;
        self.template.lock().apply_params(params);
        for signal in self.signals.lock().iter_mut() {
            signal.apply_params(params);
        }
    }

    pub fn with_template<R>(&self, f: impl FnOnce(&AudioSignal) -> R) -> R {
        f(&self.template.lock())
    }

    /// Load source material into the template.
    pub fn import_pcm(&self, pcm: &PcmBuffer) {
        self.template.lock().import_pcm(pcm);
    }

    /// Allocate a signal tagged to `recall_id`, laid out from the template.
    ///
    /// Fails if `context` is not the id's context or does not list this
    /// recycling.
    pub fn create_audio_signal_with_defaults(
        &self,
        recall_id: &RecallIdEntry,
        context: &RecyclingContext,
    ) -> RecallResult<SignalId> {
        self.create_audio_signal(recall_id, context, SignalTiming::default())
    }

    pub fn create_audio_signal(
        &self,
        recall_id: &RecallIdEntry,
        context: &RecyclingContext,
        timing: SignalTiming,
    ) -> RecallResult<SignalId> {
        if context.id() != recall_id.context || !context.contains(self.id) {
            return Err(RecallError::NotInContext {
                recycling: self.id,
                context: recall_id.context,
            });
        }

        let mut signal = AudioSignal::tagged(self.id, self.params(), recall_id.id, context.id());
        signal.set_timing(timing);
        {
            let template = self.template.lock();
            if template.frame_count() > 0 {
                signal.duplicate_stream(&template);
            }
        }

        let id = signal.id();
        self.signals.lock().push(signal);
        tracing::debug!(recycling = %self.id, signal = %id, recall_id = %recall_id.id, "created audio signal");
        Ok(id)
    }

    /// Append a ready-made signal. Returns `false` if it belongs elsewhere.
    pub fn add_audio_signal(&self, signal: AudioSignal) -> bool {
        if signal.recycling() != self.id || signal.is_template() {
            return false;
        }
        self.signals.lock().push(signal);
        true
    }

    /// Next signal of `recall_id` after `after`, or the first when `after` is
    /// `None`. `None` means end of stream, not an error.
    pub fn find_next_channel(
        &self,
        recall_id: RecallId,
        after: Option<SignalId>,
    ) -> Option<SignalId> {
        let signals = self.signals.lock();
        let start = match after {
            Some(after) => signals.iter().position(|s| s.id() == after)? + 1,
            None => 0,
        };
        signals[start..]
            .iter()
            .find(|s| s.recall_id() == Some(recall_id))
            .map(|s| s.id())
    }

    pub fn find_by_recall_id(&self, recall_id: RecallId) -> Vec<SignalId> {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.recall_id() == Some(recall_id))
            .map(|s| s.id())
            .collect()
    }

    /// Signals tagged to any of `contexts`, in list order.
    pub fn find_by_contexts(&self, contexts: &[ContextId]) -> Vec<SignalId> {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.context().is_some_and(|c| contexts.contains(&c)))
            .map(|s| s.id())
            .collect()
    }

    pub fn contains_signal(&self, id: SignalId) -> bool {
        self.signals.lock().iter().any(|s| s.id() == id)
    }

    /// Context tag of a signal.
    pub fn signal_context(&self, id: SignalId) -> Option<Option<ContextId>> {
        self.signals
            .lock()
            .iter()
            .find(|s| s.id() == id)
            .map(|s| s.context())
    }

    pub fn read_signal<R>(&self, id: SignalId, f: impl FnOnce(&AudioSignal) -> R) -> Option<R> {
        self.signals.lock().iter().find(|s| s.id() == id).map(f)
    }

    pub fn with_signal<R>(
        &self,
        id: SignalId,
        f: impl FnOnce(&mut AudioSignal) -> R,
    ) -> Option<R> {
        self.signals.lock().iter_mut().find(|s| s.id() == id).map(f)
    }

    pub fn remove_signal(&self, id: SignalId) -> bool {
        let mut signals = self.signals.lock();
        let before = signals.len();
        signals.retain(|s| s.id() != id);
        signals.len() != before
    }

    pub fn remove_by_recall_id(&self, recall_id: RecallId) -> usize {
        let mut signals = self.signals.lock();
        let before = signals.len();
        signals.retain(|s| s.recall_id() != Some(recall_id));
        before - signals.len()
    }

    pub fn remove_by_context(&self, context: ContextId) -> usize {
        let mut signals = self.signals.lock();
        let before = signals.len();
        signals.retain(|s| s.context() != Some(context));
        before - signals.len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }

    /// `(signal, context tag)` for every signal, for isolation checks.
    pub fn signal_tags(&self) -> Vec<(SignalId, Option<ContextId>)> {
        self.signals
            .lock()
            .iter()
            .map(|s| (s.id(), s.context()))
            .collect()
    }
}

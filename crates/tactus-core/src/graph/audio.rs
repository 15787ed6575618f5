//! Audios: the unit the application manipulates.

use super::channel::ChannelKind;
use crate::audio_signal::SignalParams;
use crate::lockfree::AtomicFlag;
use crate::recall::MappedRecall;
use crate::{AbilityFlags, AudioId, ChannelId, RecallKey};
use std::sync::Arc;

/// Parameters for a new audio.
#[derive(Debug, Clone)]
pub struct AudioSpec {
    pub name: String,
    pub audio_channels: usize,
    pub output_pads: usize,
    pub input_pads: usize,
    /// Inputs get their own recyclings instead of borrowing a linked output's.
    pub input_has_recycling: bool,
    pub ability: AbilityFlags,
    /// Falls back to the engine defaults.
    pub params: Option<SignalParams>,
}

impl AudioSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            audio_channels: 1,
            output_pads: 1,
            input_pads: 1,
            input_has_recycling: true,
            ability: AbilityFlags::ALL,
            params: None,
        }
    }

    pub fn audio_channels(mut self, count: usize) -> Self {
        self.audio_channels = count;
        self
    }

    pub fn output_pads(mut self, count: usize) -> Self {
        self.output_pads = count;
        self
    }

    pub fn input_pads(mut self, count: usize) -> Self {
        self.input_pads = count;
        self
    }

    pub fn input_has_recycling(mut self, owned: bool) -> Self {
        self.input_has_recycling = owned;
        self
    }

    pub fn ability(mut self, ability: AbilityFlags) -> Self {
        self.ability = ability;
        self
    }

    pub fn params(mut self, params: SignalParams) -> Self {
        self.params = Some(params);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Audio {
    pub(crate) id: AudioId,
    pub(crate) name: String,
    pub(crate) audio_channels: usize,
    pub(crate) output_pads: usize,
    pub(crate) input_pads: usize,
    pub(crate) outputs: Vec<ChannelId>,
    pub(crate) inputs: Vec<ChannelId>,
    pub(crate) input_has_recycling: bool,
    pub(crate) ability: AbilityFlags,
    pub(crate) params: SignalParams,
    pub(crate) recalls: Vec<RecallKey>,
    pub(crate) mapped: Vec<MappedRecall>,
    pub(crate) busy: Arc<AtomicFlag>,
}

impl Audio {
    pub fn id(&self) -> AudioId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn audio_channels(&self) -> usize {
        self.audio_channels
    }

    pub fn pads(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Output => self.output_pads,
            ChannelKind::Input => self.input_pads,
        }
    }

    /// Channels of `kind` in line order.
    pub fn channels(&self, kind: ChannelKind) -> &[ChannelId] {
        match kind {
            ChannelKind::Output => &self.outputs,
            ChannelKind::Input => &self.inputs,
        }
    }

    pub(crate) fn channels_mut(&mut self, kind: ChannelKind) -> &mut Vec<ChannelId> {
        match kind {
            ChannelKind::Output => &mut self.outputs,
            ChannelKind::Input => &mut self.inputs,
        }
    }

    pub(crate) fn set_pads(&mut self, kind: ChannelKind, pads: usize) {
        match kind {
            ChannelKind::Output => self.output_pads = pads,
            ChannelKind::Input => self.input_pads = pads,
        }
    }

    pub fn input_has_recycling(&self) -> bool {
        self.input_has_recycling
    }

    pub fn ability(&self) -> AbilityFlags {
        self.ability
    }

    pub fn params(&self) -> SignalParams {
        self.params
    }

    /// Audio-scope recall templates.
    pub fn recalls(&self) -> &[RecallKey] {
        &self.recalls
    }

    /// Recall families mapped onto this audio, replayed for new channels.
    pub fn mapped(&self) -> &[MappedRecall] {
        &self.mapped
    }

    /// Raised while a tic runs over this audio.
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub(crate) fn busy_flag(&self) -> Arc<AtomicFlag> {
        Arc::clone(&self.busy)
    }

    /// `pads * audio_channels == channels.len()` for both kinds.
    pub fn is_consistent(&self) -> bool {
        self.outputs.len() == self.output_pads * self.audio_channels
            && self.inputs.len() == self.input_pads * self.audio_channels
    }
}

//! Channel/audio graph.
//!
//! Audios, channels and recyclings live in an arena addressed by stable ids;
//! sibling order is id lookups, never pointers. The engine keeps one writable
//! graph and publishes clones of it for the tic to read.

mod audio;
mod channel;
mod resize;

pub use audio::{Audio, AudioSpec};
pub use channel::{Channel, ChannelKind};
pub use resize::ResizeReport;

use crate::audio_signal::SignalParams;
use crate::error::{BusyReason, GraphError};
use crate::lockfree::AtomicFlag;
use crate::recall::{MappedRecall, RecallTarget};
use crate::recycling::Recycling;
use crate::{AudioId, ChannelId, RecallKey, RecyclingId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Arena of audios, channels and recyclings.
#[derive(Debug, Clone, Default)]
pub struct AudioGraph {
    audios: HashMap<AudioId, Audio>,
    channels: HashMap<ChannelId, Channel>,
    recyclings: HashMap<RecyclingId, Arc<Recycling>>,
}

impl AudioGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio(&self, id: AudioId) -> Option<&Audio> {
        self.audios.get(&id)
    }

    pub(crate) fn audio_mut(&mut self, id: AudioId) -> Result<&mut Audio, GraphError> {
        self.audios.get_mut(&id).ok_or(GraphError::UnknownAudio(id))
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel, GraphError> {
        self.channels.get_mut(&id).ok_or(GraphError::UnknownChannel(id))
    }

    pub fn recycling(&self, id: RecyclingId) -> Option<&Arc<Recycling>> {
        self.recyclings.get(&id)
    }

    pub fn audios(&self) -> impl Iterator<Item = &Audio> {
        self.audios.values()
    }

    pub fn audio_count(&self) -> usize {
        self.audios.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn recycling_count(&self) -> usize {
        self.recyclings.len()
    }

    pub fn channel_at(
        &self,
        audio: AudioId,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Option<&Channel> {
        let audio = self.audios.get(&audio)?;
        if audio_channel >= audio.audio_channels {
            return None;
        }
        let id = audio
            .channels(kind)
            .get(pad * audio.audio_channels + audio_channel)?;
        self.channels.get(id)
    }

    /// Recyclings owned by the audio's channels: outputs first, then inputs,
    /// each in line order.
    pub fn recyclings_of(&self, audio: AudioId) -> Vec<RecyclingId> {
        let Some(audio) = self.audios.get(&audio) else {
            return Vec::new();
        };
        audio
            .outputs
            .iter()
            .chain(audio.inputs.iter())
            .filter_map(|id| self.channels.get(id))
            .filter(|ch| ch.owns_recycling)
            .flat_map(|ch| ch.recyclings.iter().copied())
            .collect()
    }

    /// Audios whose outputs feed `audio`'s inputs.
    pub fn upstream_of(&self, audio: AudioId) -> Vec<AudioId> {
        let Some(audio) = self.audios.get(&audio) else {
            return Vec::new();
        };
        let mut upstream = Vec::new();
        for input in audio.inputs.iter().filter_map(|id| self.channels.get(id)) {
            let source = input
                .link
                .and_then(|link| self.channels.get(&link))
                .map(|ch| ch.audio);
            if let Some(source) = source {
                if !upstream.contains(&source) {
                    upstream.push(source);
                }
            }
        }
        upstream
    }

    pub(crate) fn ensure_idle(&self, audio: AudioId) -> Result<(), GraphError> {
        let audio = self.audios.get(&audio).ok_or(GraphError::UnknownAudio(audio))?;
        if audio.is_busy() {
            return Err(GraphError::Busy(BusyReason::TicInFlight));
        }
        Ok(())
    }

    pub fn add_audio(&mut self, spec: AudioSpec, defaults: SignalParams) -> AudioId {
        let id = AudioId::next();
        let params = spec.params.unwrap_or(defaults);
        self.audios.insert(
            id,
            Audio {
                id,
                name: spec.name,
                audio_channels: spec.audio_channels,
                output_pads: spec.output_pads,
                input_pads: spec.input_pads,
                outputs: Vec::new(),
                inputs: Vec::new(),
                input_has_recycling: spec.input_has_recycling,
                ability: spec.ability,
                params,
                recalls: Vec::new(),
                mapped: Vec::new(),
                busy: Arc::new(AtomicFlag::new(false)),
            },
        );

        for kind in [ChannelKind::Output, ChannelKind::Input] {
            let pads = match kind {
                ChannelKind::Output => spec.output_pads,
                ChannelKind::Input => spec.input_pads,
            };
            let mut order = Vec::with_capacity(pads * spec.audio_channels);
            for pad in 0..pads {
                for audio_channel in 0..spec.audio_channels {
                    order.push(self.spawn_channel(id, kind, pad, audio_channel));
                }
            }
            self.relink(&order, spec.audio_channels);
            if let Ok(audio) = self.audio_mut(id) {
                *audio.channels_mut(kind) = order;
            }
        }

        tracing::debug!(audio = %id, "added audio");
        id
    }

    /// Create one channel, with a recycling when its kind calls for one.
    pub(crate) fn spawn_channel(
        &mut self,
        audio: AudioId,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> ChannelId {
        let (owns, params) = match self.audios.get(&audio) {
            Some(a) => (
                kind == ChannelKind::Output || a.input_has_recycling,
                a.params,
            ),
            None => (true, SignalParams::default()),
        };

        let mut channel = Channel::new(kind, audio, pad, audio_channel);
        if owns {
            let recycling = Recycling::new(channel.id, params);
            channel.recyclings.push(recycling.id());
            channel.owns_recycling = true;
            self.recyclings.insert(recycling.id(), recycling);
        }
        let id = channel.id;
        self.channels.insert(id, channel);
        id
    }

    /// Drop a channel together with the recyclings it owns and its link.
    pub(crate) fn free_channel(&mut self, id: ChannelId) -> Vec<RecyclingId> {
        let _ = self.unlink_inner(id);
        let Some(channel) = self.channels.remove(&id) else {
            return Vec::new();
        };
        if !channel.owns_recycling {
            return Vec::new();
        }
        for recycling in &channel.recyclings {
            self.recyclings.remove(recycling);
        }
        channel.recyclings.to_vec()
    }

    /// Rewrite sibling links for `order` (line order, `audio_channels` per pad).
    /// Only links that actually change are written; returns how many did.
    pub(crate) fn relink(&mut self, order: &[ChannelId], audio_channels: usize) -> usize {
        let mut changed = 0;
        for (line, id) in order.iter().enumerate() {
            let prev = line.checked_sub(1).map(|i| order[i]);
            let next = order.get(line + 1).copied();
            let prev_pad = line.checked_sub(audio_channels).map(|i| order[i]);
            let next_pad = order.get(line + audio_channels).copied();
            let pad = line / audio_channels.max(1);
            let audio_channel = line % audio_channels.max(1);

            let Some(channel) = self.channels.get_mut(id) else {
                continue;
            };
            for (slot, value) in [
                (&mut channel.prev, prev),
                (&mut channel.next, next),
                (&mut channel.prev_pad, prev_pad),
                (&mut channel.next_pad, next_pad),
            ] {
                if *slot != value {
                    *slot = value;
                    changed += 1;
                }
            }
            channel.line = line;
            channel.pad = pad;
            channel.audio_channel = audio_channel;
        }
        changed
    }

    /// Wire `output` of one audio into `input` of another.
    pub fn link(&mut self, input: ChannelId, output: ChannelId) -> Result<(), GraphError> {
        let (input_audio, output_audio) = {
            let i = self.channels.get(&input).ok_or(GraphError::UnknownChannel(input))?;
            let o = self.channels.get(&output).ok_or(GraphError::UnknownChannel(output))?;
            if i.kind != ChannelKind::Input || o.kind != ChannelKind::Output {
                return Err(GraphError::InvalidLink(format!(
                    "{input} must be an input and {output} an output"
                )));
            }
            (i.audio, o.audio)
        };
        self.ensure_idle(input_audio)?;
        self.ensure_idle(output_audio)?;
        if input_audio == output_audio || self.feeds(input_audio, output_audio) {
            return Err(GraphError::InvalidLink(format!(
                "linking {output} into {input} closes a cycle"
            )));
        }

        self.unlink_inner(input)?;
        self.unlink_inner(output)?;

        let shared = self.channel(output).map(|o| o.recyclings.clone()).unwrap_or_default();
        let input_ch = self.channel_mut(input)?;
        input_ch.link = Some(output);
        if !input_ch.owns_recycling {
            input_ch.recyclings = shared;
        }
        self.channel_mut(output)?.link = Some(input);
        tracing::debug!(input = %input, output = %output, "linked channels");
        Ok(())
    }

    pub fn unlink(&mut self, channel: ChannelId) -> Result<(), GraphError> {
        let audio = self
            .channels
            .get(&channel)
            .ok_or(GraphError::UnknownChannel(channel))?
            .audio;
        self.ensure_idle(audio)?;
        self.unlink_inner(channel)
    }

    fn unlink_inner(&mut self, channel: ChannelId) -> Result<(), GraphError> {
        let partner = self.channel_mut(channel)?.link.take();
        if let Some(partner) = partner {
            if let Some(p) = self.channels.get_mut(&partner) {
                p.link = None;
            }
        }
        for id in [Some(channel), partner].into_iter().flatten() {
            if let Some(ch) = self.channels.get_mut(&id) {
                if ch.kind == ChannelKind::Input && !ch.owns_recycling {
                    ch.recyclings.clear();
                }
            }
        }
        Ok(())
    }

    /// Whether `from` feeds `to` through links, directly or transitively.
    fn feeds(&self, from: AudioId, to: AudioId) -> bool {
        let mut stack = vec![to];
        let mut seen = HashSet::new();
        while let Some(audio) = stack.pop() {
            if !seen.insert(audio) {
                continue;
            }
            for upstream in self.upstream_of(audio) {
                if upstream == from {
                    return true;
                }
                stack.push(upstream);
            }
        }
        false
    }

    /// Propagate samplerate, buffer size and format to every recycling of the audio.
    pub fn set_params(&mut self, audio: AudioId, params: SignalParams) -> Result<(), GraphError> {
        self.ensure_idle(audio)?;
        self.audio_mut(audio)?.params = params;
        for recycling in self.recyclings_of(audio) {
            if let Some(r) = self.recyclings.get(&recycling) {
                r.set_params(params);
            }
        }
        Ok(())
    }

    /// Remove an audio with all its channels. Returns the freed recyclings.
    pub fn remove_audio(&mut self, audio: AudioId) -> Result<Vec<RecyclingId>, GraphError> {
        self.ensure_idle(audio)?;
        let removed = self
            .audios
            .remove(&audio)
            .ok_or(GraphError::UnknownAudio(audio))?;
        let mut freed = Vec::new();
        for id in removed.outputs.iter().chain(removed.inputs.iter()) {
            freed.extend(self.free_channel(*id));
        }
        tracing::debug!(audio = %audio, "removed audio");
        Ok(freed)
    }

    /// Record a template on the audio or channel it targets.
    pub(crate) fn attach_recall(&mut self, target: &RecallTarget, key: RecallKey) -> Result<(), GraphError> {
        match *target {
            RecallTarget::Audio(audio) => self.audio_mut(audio)?.recalls.push(key),
            RecallTarget::Channel { channel, .. } => self.channel_mut(channel)?.recalls.push(key),
            _ => return Err(GraphError::UnknownRecall(key)),
        }
        Ok(())
    }

    pub(crate) fn detach_recall(&mut self, target: &RecallTarget, key: RecallKey) {
        match *target {
            RecallTarget::Audio(audio) => {
                if let Some(a) = self.audios.get_mut(&audio) {
                    a.recalls.retain(|k| *k != key);
                }
            }
            RecallTarget::Channel { channel, .. } => {
                if let Some(ch) = self.channels.get_mut(&channel) {
                    ch.recalls.retain(|k| *k != key);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn push_mapped(&mut self, audio: AudioId, mapped: MappedRecall) -> Result<(), GraphError> {
        self.audio_mut(audio)?.mapped.push(mapped);
        Ok(())
    }

    /// Templates of the audio and of all its channels, outputs first.
    pub fn templates_of(&self, audio: AudioId) -> Vec<RecallKey> {
        let Some(a) = self.audios.get(&audio) else {
            return Vec::new();
        };
        let mut templates = a.recalls.clone();
        for id in a.outputs.iter().chain(a.inputs.iter()) {
            if let Some(ch) = self.channels.get(id) {
                templates.extend(ch.recalls.iter().copied());
            }
        }
        templates
    }

    /// Audio owning a recycling.
    pub fn audio_of_recycling(&self, recycling: RecyclingId) -> Option<AudioId> {
        let channel = self.recyclings.get(&recycling)?.channel();
        self.channels.get(&channel).map(|ch| ch.audio)
    }

    /// Audio a recall target belongs to.
    pub fn audio_of(&self, target: &RecallTarget) -> Option<AudioId> {
        match *target {
            RecallTarget::Audio(audio) => self.audios.contains_key(&audio).then_some(audio),
            RecallTarget::Channel { channel, .. } => self.channels.get(&channel).map(|ch| ch.audio),
            RecallTarget::Recycling { source, .. } => self.audio_of_recycling(source),
            RecallTarget::Signal { recycling, .. } => self.audio_of_recycling(recycling),
        }
    }

    pub(crate) fn set_busy(&self, audio: AudioId, busy: bool) -> Option<Arc<AtomicFlag>> {
        let flag = self.audios.get(&audio)?.busy_flag();
        flag.set(busy);
        Some(flag)
    }
}

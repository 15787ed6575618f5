//! Playback bookkeeping: which contexts run an audio, per sound scope.

use crate::{AudioId, ChannelId, ContextId, SoundScope};
use smallvec::SmallVec;

/// Per output channel record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback {
    channel: ChannelId,
    /// Preferred worker for this channel's units.
    affinity: Option<usize>,
}

impl Playback {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            affinity: None,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn affinity(&self) -> Option<usize> {
        self.affinity
    }
}

/// Contexts an audio takes part in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackDomain {
    audio: AudioId,
    /// Toplevel context started for the audio, per sound scope.
    roots: [Option<ContextId>; SoundScope::ALL.len()],
    /// Child contexts the audio runs in as an upstream of another audio.
    nested: SmallVec<[(SoundScope, ContextId); 2]>,
    playbacks: Vec<Playback>,
}

impl PlaybackDomain {
    pub fn new(audio: AudioId, outputs: &[ChannelId]) -> Self {
        Self {
            audio,
            roots: [None; SoundScope::ALL.len()],
            nested: SmallVec::new(),
            playbacks: outputs.iter().copied().map(Playback::new).collect(),
        }
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn context(&self, scope: SoundScope) -> Option<ContextId> {
        self.roots[scope.index()]
    }

    pub(crate) fn set_context(&mut self, scope: SoundScope, context: Option<ContextId>) {
        self.roots[scope.index()] = context;
    }

    pub fn nested(&self) -> impl Iterator<Item = (SoundScope, ContextId)> + '_ {
        self.nested.iter().copied()
    }

    pub(crate) fn add_nested(&mut self, scope: SoundScope, context: ContextId) {
        if !self.nested.contains(&(scope, context)) {
            self.nested.push((scope, context));
        }
    }

    /// Every context, toplevel or nested, the audio runs in.
    pub fn contexts(&self) -> Vec<ContextId> {
        self.roots
            .iter()
            .flatten()
            .copied()
            .chain(self.nested.iter().map(|(_, c)| *c))
            .collect()
    }

    pub fn is_playing(&self, scope: SoundScope) -> bool {
        self.context(scope).is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.roots.iter().all(Option::is_none) && self.nested.is_empty()
    }

    pub fn playbacks(&self) -> &[Playback] {
        &self.playbacks
    }

    pub fn playback(&self, channel: ChannelId) -> Option<&Playback> {
        self.playbacks.iter().find(|p| p.channel == channel)
    }

    pub fn set_affinity(&mut self, channel: ChannelId, worker: Option<usize>) -> bool {
        match self.playbacks.iter_mut().find(|p| p.channel == channel) {
            Some(playback) => {
                playback.affinity = worker;
                true
            }
            None => false,
        }
    }

    /// Keep the playback list in line with the audio's output channels.
    pub(crate) fn sync_outputs(&mut self, outputs: &[ChannelId]) {
        self.playbacks.retain(|p| outputs.contains(&p.channel));
        for channel in outputs {
            if self.playback(*channel).is_none() {
                self.playbacks.push(Playback::new(*channel));
            }
        }
    }

    /// Drop every reference to a destroyed context.
    pub(crate) fn forget(&mut self, context: ContextId) -> bool {
        let mut found = false;
        for slot in self.roots.iter_mut() {
            if *slot == Some(context) {
                *slot = None;
                found = true;
            }
        }
        let before = self.nested.len();
        self.nested.retain(|(_, c)| *c != context);
        found || self.nested.len() != before
    }
}

//! Output and input channels.

use crate::{AudioId, ChannelId, RecallKey, RecyclingId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Output,
    Input,
}

/// One line of an audio.
///
/// Siblings are addressed by id in two independent orders: `prev`/`next`
/// follow the line order of the same kind, `prev_pad`/`next_pad` connect the
/// same audio channel across pads.
#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) kind: ChannelKind,
    pub(crate) audio: AudioId,
    pub(crate) pad: usize,
    pub(crate) audio_channel: usize,
    pub(crate) line: usize,
    pub(crate) prev: Option<ChannelId>,
    pub(crate) next: Option<ChannelId>,
    pub(crate) prev_pad: Option<ChannelId>,
    pub(crate) next_pad: Option<ChannelId>,
    pub(crate) link: Option<ChannelId>,
    pub(crate) recyclings: SmallVec<[RecyclingId; 1]>,
    pub(crate) owns_recycling: bool,
    pub(crate) recalls: Vec<RecallKey>,
}

impl Channel {
    pub(crate) fn new(kind: ChannelKind, audio: AudioId, pad: usize, audio_channel: usize) -> Self {
        Self {
            id: ChannelId::next(),
            kind,
            audio,
            pad,
            audio_channel,
            line: 0,
            prev: None,
            next: None,
            prev_pad: None,
            next_pad: None,
            link: None,
            recyclings: SmallVec::new(),
            owns_recycling: false,
            recalls: Vec::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn audio_channel(&self) -> usize {
        self.audio_channel
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn prev(&self) -> Option<ChannelId> {
        self.prev
    }

    pub fn next(&self) -> Option<ChannelId> {
        self.next
    }

    pub fn prev_pad(&self) -> Option<ChannelId> {
        self.prev_pad
    }

    pub fn next_pad(&self) -> Option<ChannelId> {
        self.next_pad
    }

    /// Channel of another audio this one is wired to.
    pub fn link(&self) -> Option<ChannelId> {
        self.link
    }

    pub fn recyclings(&self) -> &[RecyclingId] {
        &self.recyclings
    }

    /// `false` when the recyclings are borrowed from a linked output.
    pub fn owns_recycling(&self) -> bool {
        self.owns_recycling
    }

    /// Recall templates attached to this channel.
    pub fn recalls(&self) -> &[RecallKey] {
        &self.recalls
    }
}

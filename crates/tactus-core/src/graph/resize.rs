//! Pad and audio-channel resize.
//!
//! Existing channels keep their ids, recyclings and recalls; only the delta is
//! allocated or freed, and only sibling links that change are rewritten.

use super::{AudioGraph, ChannelKind};
use crate::error::GraphError;
use crate::{AudioId, ChannelId, RecyclingId};

/// What a resize changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResizeReport {
    pub added: Vec<ChannelId>,
    pub removed: Vec<ChannelId>,
    pub added_recyclings: Vec<RecyclingId>,
    pub removed_recyclings: Vec<RecyclingId>,
    /// Sibling link fields rewritten.
    pub relinked: usize,
}

impl ResizeReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.relinked == 0
    }
}

impl AudioGraph {
    /// Channels that shrinking the audio channel count to `new_count` would free.
    pub fn channels_beyond_audio_channel(&self, audio: AudioId, new_count: usize) -> Vec<ChannelId> {
        let Some(a) = self.audio(audio) else {
            return Vec::new();
        };
        [ChannelKind::Output, ChannelKind::Input]
            .into_iter()
            .flat_map(|kind| a.channels(kind).iter().copied())
            .filter(|id| self.channel(*id).is_some_and(|ch| ch.audio_channel >= new_count))
            .collect()
    }

    /// Channels that shrinking `kind` pads to `new_count` would free.
    pub fn channels_beyond_pad(&self, audio: AudioId, kind: ChannelKind, new_count: usize) -> Vec<ChannelId> {
        let Some(a) = self.audio(audio) else {
            return Vec::new();
        };
        a.channels(kind)
            .iter()
            .copied()
            .filter(|id| self.channel(*id).is_some_and(|ch| ch.pad >= new_count))
            .collect()
    }

    fn check_count(&self, audio: AudioId, expected: usize, old: usize) -> Result<(), GraphError> {
        self.ensure_idle(audio)?;
        if expected != old {
            return Err(GraphError::CountMismatch {
                expected,
                found: old,
            });
        }
        Ok(())
    }

    /// Change the number of audio channels from `old_count` to `new_count`
    /// for outputs and inputs alike.
    pub fn resize_audio_channels(
        &mut self,
        audio: AudioId,
        new_count: usize,
        old_count: usize,
    ) -> Result<ResizeReport, GraphError> {
        let current = self
            .audio(audio)
            .ok_or(GraphError::UnknownAudio(audio))?
            .audio_channels;
        self.check_count(audio, current, old_count)?;
        if new_count == old_count {
            return Ok(ResizeReport::default());
        }

        let mut report = ResizeReport::default();
        for kind in [ChannelKind::Output, ChannelKind::Input] {
            let (pads, old_order) = {
                let a = self.audio_mut(audio)?;
                (a.pads(kind), a.channels(kind).to_vec())
            };

            let mut order = Vec::with_capacity(pads * new_count);
            for pad in 0..pads {
                for audio_channel in 0..new_count {
                    if audio_channel < old_count {
                        order.push(old_order[pad * old_count + audio_channel]);
                    } else {
                        let id = self.spawn_channel(audio, kind, pad, audio_channel);
                        order.push(id);
                        report.added.push(id);
                        if let Some(ch) = self.channel(id) {
                            report.added_recyclings.extend(ch.recyclings.iter().copied());
                        }
                    }
                }
            }
            for pad in 0..pads {
                for audio_channel in new_count..old_count {
                    let id = old_order[pad * old_count + audio_channel];
                    report.removed_recyclings.extend(self.free_channel(id));
                    report.removed.push(id);
                }
            }

            report.relinked += self.relink(&order, new_count);
            *self.audio_mut(audio)?.channels_mut(kind) = order;
        }

        self.audio_mut(audio)?.audio_channels = new_count;
        tracing::debug!(
            audio = %audio, old_count, new_count,
            added = report.added.len(), removed = report.removed.len(), relinked = report.relinked,
            "resized audio channels"
        );
        Ok(report)
    }

    /// Change the pad count of `kind` from `old_count` to `new_count`.
    pub fn resize_pads(
        &mut self,
        audio: AudioId,
        kind: ChannelKind,
        new_count: usize,
        old_count: usize,
    ) -> Result<ResizeReport, GraphError> {
        let (current, audio_channels) = {
            let a = self.audio(audio).ok_or(GraphError::UnknownAudio(audio))?;
            (a.pads(kind), a.audio_channels)
        };
        self.check_count(audio, current, old_count)?;
        if new_count == old_count {
            return Ok(ResizeReport::default());
        }

        let mut report = ResizeReport::default();
        let mut order = self.audio_mut(audio)?.channels(kind).to_vec();
        if new_count > old_count {
            for pad in old_count..new_count {
                for audio_channel in 0..audio_channels {
                    let id = self.spawn_channel(audio, kind, pad, audio_channel);
                    order.push(id);
                    report.added.push(id);
                    if let Some(ch) = self.channel(id) {
                        report.added_recyclings.extend(ch.recyclings.iter().copied());
                    }
                }
            }
        } else {
            for id in order.split_off(new_count * audio_channels) {
                report.removed_recyclings.extend(self.free_channel(id));
                report.removed.push(id);
            }
        }

        report.relinked = self.relink(&order, audio_channels);
        let a = self.audio_mut(audio)?;
        *a.channels_mut(kind) = order;
        a.set_pads(kind, new_count);
        tracing::debug!(
            audio = %audio, ?kind, old_count, new_count, relinked = report.relinked,
            "resized pads"
        );
        Ok(report)
    }
}

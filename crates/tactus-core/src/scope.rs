//! Sound scopes, ability flags and run stages.

use serde::{Deserialize, Serialize};

/// Independent axis a recall may take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundScope {
    Playback,
    Sequencer,
    Notation,
    Wave,
    Midi,
}

impl SoundScope {
    pub const ALL: [SoundScope; 5] = [
        SoundScope::Playback,
        SoundScope::Sequencer,
        SoundScope::Notation,
        SoundScope::Wave,
        SoundScope::Midi,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            SoundScope::Playback => "playback",
            SoundScope::Sequencer => "sequencer",
            SoundScope::Notation => "notation",
            SoundScope::Wave => "wave",
            SoundScope::Midi => "midi",
        }
    }
}

/// Set of sound scopes a recall participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AbilityFlags(u8);

impl AbilityFlags {
    pub const NONE: AbilityFlags = AbilityFlags(0);
    pub const PLAYBACK: AbilityFlags = AbilityFlags(1 << SoundScope::Playback as u8);
    pub const SEQUENCER: AbilityFlags = AbilityFlags(1 << SoundScope::Sequencer as u8);
    pub const NOTATION: AbilityFlags = AbilityFlags(1 << SoundScope::Notation as u8);
    pub const WAVE: AbilityFlags = AbilityFlags(1 << SoundScope::Wave as u8);
    pub const MIDI: AbilityFlags = AbilityFlags(1 << SoundScope::Midi as u8);
    pub const ALL: AbilityFlags = AbilityFlags(0b1_1111);

    #[inline]
    pub const fn from_scope(scope: SoundScope) -> Self {
        AbilityFlags(1 << scope as u8)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        AbilityFlags(bits & Self::ALL.0)
    }

    #[inline]
    pub const fn contains(self, scope: SoundScope) -> bool {
        self.0 & (1 << scope as u8) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, other: AbilityFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: AbilityFlags) {
        self.0 &= !other.0;
    }

    pub fn scopes(self) -> impl Iterator<Item = SoundScope> {
        SoundScope::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl core::ops::BitOr for AbilityFlags {
    type Output = AbilityFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        AbilityFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for AbilityFlags {
    type Output = AbilityFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        AbilityFlags(self.0 & rhs.0)
    }
}

impl From<SoundScope> for AbilityFlags {
    fn from(scope: SoundScope) -> Self {
        AbilityFlags::from_scope(scope)
    }
}

/// Ordered sub-phase of a tic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Pre,
    Inter,
    Post,
}

impl Stage {
    /// Stages every running recall receives once per tic.
    pub const RUN: [Stage; 3] = [Stage::Pre, Stage::Inter, Stage::Post];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "run_init",
            Stage::Pre => "run_pre",
            Stage::Inter => "run_inter",
            Stage::Post => "run_post",
        }
    }
}

//! Resize integration tests
//!
//! Growing and shrinking audio channels and pads while recalls are mapped.

use crate::helpers::*;
use proptest::prelude::*;
use tactus::prelude::*;
use tactus::{ChannelId, EngineConfig, EngineContext, RecallRegistry};

fn channel_ids(engine: &EngineContext, audio: AudioId, kind: ChannelKind) -> Vec<ChannelId> {
    engine.graph().audio(audio).unwrap().channels(kind).to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_resize_round_trip_keeps_low_channels(n in 1usize..6, m in 1usize..6) {
        let engine = EngineContext::new(EngineConfig::default(), RecallRegistry::new());
        let audio = engine.add_audio(AudioSpec::new("synth").audio_channels(n));
        let outputs = channel_ids(&engine, audio, ChannelKind::Output);
        let inputs = channel_ids(&engine, audio, ChannelKind::Input);

        engine.resize_audio_channels(audio, m, n).unwrap();
        prop_assert_eq!(engine.graph().audio(audio).unwrap().audio_channels(), m);
        prop_assert_eq!(channel_ids(&engine, audio, ChannelKind::Output).len(), m);

        engine.resize_audio_channels(audio, n, m).unwrap();
        let keep = n.min(m);
        let after_outputs = channel_ids(&engine, audio, ChannelKind::Output);
        let after_inputs = channel_ids(&engine, audio, ChannelKind::Input);
        prop_assert_eq!(after_outputs.len(), n);
        prop_assert_eq!(after_inputs.len(), n);
        prop_assert_eq!(&after_outputs[..keep], &outputs[..keep]);
        prop_assert_eq!(&after_inputs[..keep], &inputs[..keep]);
    }
}

#[test]
fn test_equal_count_is_noop() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    let before = channel_ids(engine.context(), audio, ChannelKind::Output);
    let report = engine.resize_audio_channels(audio, 2, 2).unwrap();
    assert!(report.is_noop());
    assert_eq!(channel_ids(engine.context(), audio, ChannelKind::Output), before);

    let report = engine.resize_pads(audio, ChannelKind::Input, 1, 1).unwrap();
    assert!(report.is_noop());
}

#[test]
fn test_stale_old_count_is_rejected() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    let err = engine.resize_audio_channels(audio, 4, 3).unwrap_err();
    assert!(err.to_string().contains('3'));
    assert_eq!(engine.graph().audio(audio).unwrap().audio_channels(), 2);
}

/// Scenario C: resizing an audio while a tic holds it is refused.
#[test]
fn test_resize_refused_during_tic() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    {
        let _guard = engine.context().tic_guard(&[audio]);
        let err = engine.resize_audio_channels(audio, 3, 2).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(engine.graph().audio(audio).unwrap().audio_channels(), 2);
    }

    let report = engine.resize_audio_channels(audio, 3, 2).unwrap();
    assert_eq!(report.added.len(), 2);
    assert_eq!(engine.graph().audio(audio).unwrap().audio_channels(), 3);
}

#[test]
fn test_growth_maps_recalls_onto_new_channels() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    let volume = engine.map_recall(audio, "volume", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();
    assert_eq!(templates(&engine, volume).len(), 2);

    let report = engine.resize_audio_channels(audio, 4, 2).unwrap();
    assert_eq!(report.added.len(), 4);
    assert_eq!(templates(&engine, volume).len(), 4);
    for ac in 0..4 {
        let input = channel(&engine, audio, ChannelKind::Input, ac);
        assert_eq!(channel_roots(&engine, context, input).len(), 1, "audio channel {ac}");
    }
    assert!(engine.tic().is_clean());
    assert!(engine.check_isolation().is_empty());

    let removed = channel(&engine, audio, ChannelKind::Input, 3);
    engine.resize_audio_channels(audio, 2, 4).unwrap();
    assert_eq!(templates(&engine, volume).len(), 2);
    assert!(channel_roots(&engine, context, removed).is_empty());
    assert!(engine.tic().is_clean());
}

#[test]
fn test_pad_resize_keeps_existing_pads() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    let first_pad = channel_ids(engine.context(), audio, ChannelKind::Input);

    let report = engine.resize_pads(audio, ChannelKind::Input, 3, 1).unwrap();
    assert_eq!(report.added.len(), 4);
    let grown = channel_ids(engine.context(), audio, ChannelKind::Input);
    assert_eq!(grown.len(), 6);
    assert_eq!(&grown[..2], &first_pad[..]);

    engine.resize_pads(audio, ChannelKind::Input, 1, 3).unwrap();
    assert_eq!(channel_ids(engine.context(), audio, ChannelKind::Input), first_pad);
    // outputs untouched
    assert_eq!(channel_ids(engine.context(), audio, ChannelKind::Output).len(), 2);
}

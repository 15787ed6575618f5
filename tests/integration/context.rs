//! Context tree integration tests
//!
//! Isolation of signals between contexts, parent-before-child stage order,
//! bind idempotence and cancellation order.

use crate::helpers::*;
use tactus::prelude::*;
use tactus::{BusyReason, Error, GraphError, Stage};

#[test]
fn test_signals_stay_in_their_context() {
    let engine = test_engine();
    let (drum, mixer) = chained(&engine, 2);
    for ac in 0..2 {
        seed_input(&engine, drum, ac, &constant(0.5, 6));
    }
    engine.map_recall(drum, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(drum, "copy", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(mixer, "copy", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let root = engine.start_playback(mixer, SoundScope::Playback).unwrap();

    for _ in 0..4 {
        let report = engine.tic();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(engine.check_isolation().is_empty());
    }

    // every tagged signal lives in a recycling its context lists
    let graph = engine.graph();
    let contexts = engine.context().contexts();
    for audio in [drum, mixer] {
        for recycling in graph.recyclings_of(audio) {
            for (_, tag) in graph.recycling(recycling).unwrap().signal_tags() {
                let Some(tag) = tag else { continue };
                assert!(contexts.get(tag).unwrap().contains(recycling));
            }
        }
    }
    assert_eq!(contexts.get(root).unwrap().children().len(), 1);
}

#[test]
fn test_parent_context_finishes_each_stage_first() {
    let log = StageLog::default();
    let engine = test_engine_with(stage_registry(&log));
    let (drum, mixer) = chained(&engine, 2);
    engine.map_recall(drum, "recorder", params! {}, ChannelKind::Output, 0, 0).unwrap();
    engine.map_recall(mixer, "recorder", params! {}, ChannelKind::Output, 0, 0).unwrap();
    let root = engine.start_playback(mixer, SoundScope::Playback).unwrap();
    let child = engine.context().contexts().get(root).unwrap().children()[0];

    for _ in 0..3 {
        log.clear();
        assert!(engine.tic().is_clean());
        let calls = log.calls();
        assert_eq!(calls.len(), 2 * 2 * 3);

        for stage in Stage::RUN {
            let last_parent = calls
                .iter()
                .filter(|c| c.context == root && c.stage == stage)
                .map(|c| c.seq)
                .max()
                .unwrap();
            let first_child = calls
                .iter()
                .filter(|c| c.context == child && c.stage == stage)
                .map(|c| c.seq)
                .min()
                .unwrap();
            assert!(last_parent < first_child, "{stage:?}: child ran before parent finished");
        }

        // inside a context every pre finishes before any inter starts
        let last_pre = calls.iter().filter(|c| c.stage == Stage::Pre).map(|c| c.seq).max();
        let first_inter = calls.iter().filter(|c| c.stage == Stage::Inter).map(|c| c.seq).min();
        assert!(last_pre < first_inter);
    }
}

#[test]
fn test_bind_twice_returns_same_id() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    let container = engine.map_recall(audio, "volume", params! {}, ChannelKind::Output, 0, 0).unwrap();
    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();
    let template = templates(&engine, container)[0];

    let ids_before = engine.context().recall_ids().count_in(context);
    let instances_before = engine.context().recalls().len();
    let first = engine.context().bind(template, context).unwrap();
    let second = engine.context().bind(template, context).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.context().recall_ids().count_in(context), ids_before);
    assert_eq!(engine.context().recalls().len(), instances_before);

    // starting the same scope again binds nothing new
    assert_eq!(engine.start_playback(audio, SoundScope::Playback).unwrap(), context);
    assert_eq!(engine.context().recall_ids().count_in(context), ids_before);
}

/// Scenario B: a parent context cannot be cancelled while a child context
/// is still bound.
#[test]
fn test_parent_cancel_waits_for_child() {
    let engine = test_engine();
    let drum = drum(&engine, 1);
    // inputs with recyclings of their own: parent and child share nothing
    let mixer = engine.add_audio(AudioSpec::new("mixer"));
    engine
        .link(
            channel(&engine, mixer, ChannelKind::Input, 0),
            channel(&engine, drum, ChannelKind::Output, 0),
        )
        .unwrap();
    engine.map_recall(drum, "volume", params! {}, ChannelKind::Output, 0, 0).unwrap();
    engine.map_recall(mixer, "volume", params! {}, ChannelKind::Output, 0, 0).unwrap();

    let parent = engine.start_playback(mixer, SoundScope::Playback).unwrap();
    let contexts = engine.context().contexts();
    let child = contexts.get(parent).unwrap().children()[0];
    let parent_recyclings = contexts.get(parent).unwrap().recyclings().to_vec();
    assert!(contexts
        .get(child)
        .unwrap()
        .recyclings()
        .iter()
        .all(|r| !parent_recyclings.contains(r)));
    engine.tic();

    let err = engine.context().cancel_context(parent).unwrap_err();
    assert!(matches!(
        err,
        tactus::core::Error::Graph(GraphError::Busy(BusyReason::LiveChildren))
    ));
    assert!(Error::from(err).is_busy());
    assert!(contexts.contains(parent));
    assert!(engine.context().recall_ids().count_in(parent) > 0);

    engine.context().cancel_context(child).unwrap();
    engine.context().cancel_context(parent).unwrap();
    assert!(!contexts.contains(parent));
    assert!(!contexts.contains(child));
}

#[test]
fn test_stop_playback_tears_down_tree() {
    let engine = test_engine();
    let (drum, mixer) = chained(&engine, 2);
    engine.map_recall(drum, "volume", params! {}, ChannelKind::Output, 0, 0).unwrap();
    let root = engine.start_playback(mixer, SoundScope::Sequencer).unwrap();
    engine.run_tics(2);

    engine.stop_playback(mixer, SoundScope::Sequencer).unwrap();
    assert!(engine.context().contexts().is_empty());
    assert_eq!(engine.context().recall_ids().count_in(root), 0);
    // templates survive
    assert!(!engine.graph().templates_of(drum).is_empty());
}

#[test]
fn test_scopes_run_in_separate_contexts() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(1.0, 8));
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();

    let playback = engine.start_playback(audio, SoundScope::Playback).unwrap();
    let sequencer = engine.start_playback(audio, SoundScope::Sequencer).unwrap();
    assert_ne!(playback, sequencer);
    assert!(engine.tic().is_clean());

    let graph = engine.graph();
    let input = graph.channel_at(audio, ChannelKind::Input, 0, 0).unwrap();
    let recycling = graph.recycling(input.recyclings()[0]).unwrap();
    assert_eq!(recycling.find_by_contexts(&[playback]).len(), 1);
    assert_eq!(recycling.find_by_contexts(&[sequencer]).len(), 1);
}

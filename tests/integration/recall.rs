//! Recall lifecycle integration tests
//!
//! Mapping templates, instantiating per context, port writes through the task
//! queue and completion of streams.

use crate::helpers::*;
use approx::assert_relative_eq;
use tactus::core::RecallScope;
use tactus::prelude::*;
use tactus::{RecallState, TaskOutcome};

/// Scenario A: one volume instance per playing signal.
#[test]
fn test_volume_follows_stream_signal() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(1.0, 16));
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let volume = engine
        .map_recall(audio, "volume", params! { "volume" => 0.5 }, ChannelKind::Input, 0, 0)
        .unwrap();
    let template = templates(&engine, volume)[0];
    engine.start_playback(audio, SoundScope::Playback).unwrap();

    for _ in 0..3 {
        let report = engine.tic();
        assert!(report.is_clean(), "{:?}", report.failures);
    }

    let recalls = engine.context().recalls();
    assert_eq!(recalls.count(template, RecallScope::Channel), 1);
    assert_eq!(recalls.count(template, RecallScope::Recycling), 1);
    assert_eq!(recalls.count(template, RecallScope::AudioSignal), 1);
}

#[test]
fn test_map_recall_spans_audio_channels() {
    let engine = test_engine();
    let audio = drum(&engine, 4);
    let container = engine
        .map_recall(audio, "volume", params! {}, ChannelKind::Input, 1, 0)
        .unwrap();
    assert_eq!(templates(&engine, container).len(), 3);

    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();
    assert!(channel_roots(&engine, context, channel(&engine, audio, ChannelKind::Input, 0)).is_empty());
    for ac in 1..4 {
        let roots = channel_roots(&engine, context, channel(&engine, audio, ChannelKind::Input, ac));
        assert_eq!(roots.len(), 1);
    }
}

#[test]
fn test_unknown_family_is_rejected() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    let err = engine
        .map_recall(audio, "no-such-recall", params! {}, ChannelKind::Input, 0, 0)
        .unwrap_err();
    assert!(err.to_string().contains("no-such-recall"));
    assert!(engine.graph().templates_of(audio).is_empty());
}

#[test]
fn test_port_write_through_task_reaches_output() {
    let engine = test_engine();
    let mut output = engine.take_output().unwrap();
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(1.0, 16));
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let volume = engine.map_recall(audio, "volume", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(audio, "copy", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.start_playback(audio, SoundScope::Playback).unwrap();

    assert!(engine.tic().is_clean());
    let first = drain(&mut output);
    assert_eq!(first.len(), TEST_BUFFER_SIZE * engine.outputs());
    assert_relative_eq!(first[0], 1.0);

    let ticket = engine.submit(Task::write_port(audio, volume, "volume", PortValue::Float(0.25)));
    let report = engine.tic();
    assert_eq!(report.tasks, 1);
    assert!(matches!(ticket.wait(), Ok(TaskOutcome::Done)));
    assert_eq!(engine.read_port(volume, "volume").unwrap(), PortValue::Float(0.25));

    let second = drain(&mut output);
    for frame in second.chunks(engine.outputs()) {
        assert_relative_eq!(frame[0], 0.25);
        // mono drum leaves the right channel silent
        assert_relative_eq!(frame[1], 0.0);
    }
}

#[test]
fn test_port_write_rejects_wrong_type() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    let mute = engine.map_recall(audio, "mute", params! {}, ChannelKind::Input, 0, 0).unwrap();
    assert!(engine.write_port(mute, "muted", PortValue::Float(0.5)).is_err());
    assert!(engine.write_port(mute, "missing", PortValue::Bool(true)).is_err());
    assert_eq!(engine.read_port(mute, "muted").unwrap(), PortValue::Bool(false));
}

#[test]
fn test_finished_stream_completes_context() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(0.5, 2));
    let stream = engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let template = templates(&engine, stream)[0];
    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();

    engine.tic();
    assert!(!engine.is_done(context));
    assert_eq!(engine.context().recalls().count(template, RecallScope::AudioSignal), 1);

    let reports = engine.run_tics(3);
    assert!(reports.iter().all(TicReport::is_clean));
    assert!(reports.iter().map(|r| r.reaped).sum::<usize>() > 0);
    assert!(engine.is_done(context));

    let recalls = engine.context().recalls();
    assert_eq!(recalls.count(template, RecallScope::AudioSignal), 0);
    let roots = channel_roots(&engine, context, channel(&engine, audio, ChannelKind::Input, 0));
    assert_eq!(recalls.state(roots[0]), Some(RecallState::Done));
}

#[test]
fn test_cancel_recall_removes_instances() {
    let engine = test_engine();
    let audio = drum(&engine, 2);
    seed_input(&engine, audio, 0, &constant(1.0, 8));
    let stream = engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();
    engine.tic();

    let input = channel(&engine, audio, ChannelKind::Input, 0);
    let root = channel_roots(&engine, context, input)[0];
    engine.cancel_recall(root).unwrap();
    assert!(channel_roots(&engine, context, input).is_empty());
    assert!(engine.tic().is_clean());

    // the other audio channel keeps its instance, and the template stays
    let other = channel(&engine, audio, ChannelKind::Input, 1);
    assert_eq!(channel_roots(&engine, context, other).len(), 1);
    assert_eq!(templates(&engine, stream).len(), 2);
}

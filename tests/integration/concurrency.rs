//! Concurrency integration tests
//!
//! Failure containment across units, scope breaches, and tasks submitted
//! while the driver thread is running.

use crate::helpers::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tactus::{Stage, TaskOutcome, WorkerError};
use tactus::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

/// Scenario D: a failing unit stops only its own channel.
#[test]
fn test_failed_unit_leaves_siblings_running() {
    let engine = test_engine_with(stage_registry(&StageLog::default()));
    let mut output = engine.take_output().unwrap();
    let audio = drum(&engine, 2);
    for ac in 0..2 {
        seed_input(&engine, audio, ac, &constant(0.5, 8));
    }
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(audio, "copy", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(audio, "faulty", params! {}, ChannelKind::Input, 1, 0).unwrap();
    let context = engine.start_playback(audio, SoundScope::Playback).unwrap();

    let report = engine.tic();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0], WorkerError::Failed { stage: Stage::Inter, .. }));
    assert!(report.skipped.is_empty());
    let failed = report.failed_units();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].context, context);
    assert_eq!(report.frames, TEST_BUFFER_SIZE);

    let samples = drain(&mut output);
    let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
    let right: Vec<f32> = samples.iter().skip(1).step_by(2).copied().collect();
    assert!(peak(&left) > 0.4);
    assert_eq!(peak(&right), 0.0);

    // the failure repeats every tic without spreading
    let report = engine.tic();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(engine.metrics().failures, 2);
}

#[test]
fn test_panicking_recall_is_contained() {
    #[derive(Clone)]
    struct Explodes;

    impl Recall for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        fn run_post(&mut self, _cx: &mut RunContext<'_>) -> RecallResult {
            panic!("post exploded");
        }
    }

    let engine = test_engine();
    let audio = drum(&engine, 1);
    let output = channel(&engine, audio, ChannelKind::Output, 0);
    engine
        .context()
        .add_template(
            Box::new(Explodes),
            RecallTarget::channel(output),
            tactus::PortSet::empty(),
            Default::default(),
        )
        .unwrap();
    engine.start_playback(audio, SoundScope::Playback).unwrap();

    let report = engine.tic();
    assert!(matches!(
        &report.failures[..],
        [WorkerError::Panicked { stage: Stage::Post, message, .. }] if message.contains("exploded")
    ));
    // workers survive the panic
    assert_eq!(engine.tic().failures.len(), 1);
}

#[test]
fn test_scope_breach_poisons_context() {
    let engine = test_engine_with(stage_registry(&StageLog::default()));
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(0.5, 8));
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(audio, "snoop", params! {}, ChannelKind::Output, 0, 0).unwrap();
    let playback = engine.start_playback(audio, SoundScope::Playback).unwrap();
    let sequencer = engine.start_playback(audio, SoundScope::Sequencer).unwrap();

    let report = engine.tic();
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(WorkerError::poisons_context));
    // the stream units stop after the breach
    assert_eq!(report.skipped.len(), 2);
    let mut contexts: Vec<ContextId> = report.skipped.iter().map(|u| u.context).collect();
    contexts.sort();
    let mut expected = vec![playback, sequencer];
    expected.sort();
    assert_eq!(contexts, expected);

    // nothing leaked across contexts
    assert!(engine.check_isolation().is_empty());
}

#[test]
fn test_tasks_applied_while_driver_runs() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(1.0, 64));
    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(engine.start().is_err());

    let mapped = engine.submit(Task::map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0));
    let container = match mapped.wait_timeout(WAIT) {
        Some(Ok(TaskOutcome::Container(container))) => container,
        other => panic!("map_recall task: {other:?}"),
    };
    assert_eq!(templates(&engine, container).len(), 1);

    let started = engine.submit(Task::start_playback(audio, SoundScope::Playback));
    let context = match started.wait_timeout(WAIT) {
        Some(Ok(TaskOutcome::Context(context))) => context,
        other => panic!("start_playback task: {other:?}"),
    };

    let resized = engine.submit(Task::resize_audio_channels(audio, 2, 1));
    assert!(matches!(resized.wait_timeout(WAIT), Some(Ok(TaskOutcome::Resized(_)))));

    engine.stop();
    assert!(!engine.is_running());
    assert!(engine.metrics().tics > 0);
    let second = channel(&engine, audio, ChannelKind::Input, 1);
    assert_eq!(channel_roots(&engine, context, second).len(), 1);
}

#[test]
fn test_tasks_from_many_threads() {
    let engine = Arc::new(test_engine());
    let audios: Vec<AudioId> = (0..4).map(|_| drum(&engine, 1)).collect();

    let tickets: Vec<_> = audios
        .iter()
        .map(|audio| {
            let engine = Arc::clone(&engine);
            let audio = *audio;
            thread::spawn(move || engine.submit(Task::start_playback(audio, SoundScope::Playback)))
        })
        .map(|handle| handle.join().unwrap())
        .collect();

    let report = engine.tic();
    assert_eq!(report.tasks, 4);
    for ticket in tickets {
        assert!(matches!(ticket.wait(), Ok(TaskOutcome::Context(_))));
    }
    assert_eq!(engine.context().active_roots().len(), 4);
}

#[test]
fn test_second_structural_task_waits_a_tic() {
    let engine = test_engine();
    let audio = drum(&engine, 1);
    let first = engine.submit(Task::resize_audio_channels(audio, 2, 1));
    let second = engine.submit(Task::resize_audio_channels(audio, 3, 2));

    assert_eq!(engine.tic().tasks, 1);
    assert!(second.try_result().is_none());
    assert!(matches!(first.wait(), Ok(TaskOutcome::Resized(_))));

    assert_eq!(engine.tic().tasks, 1);
    assert!(matches!(second.wait(), Ok(TaskOutcome::Resized(_))));
    assert_eq!(engine.graph().audio(audio).unwrap().audio_channels(), 3);
}

#[test]
fn test_direct_resize_races_driver_cleanly() {
    let engine = Arc::new(test_engine());
    let audio = drum(&engine, 1);
    seed_input(&engine, audio, 0, &constant(0.5, 256));
    engine.map_recall(audio, "stream", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.map_recall(audio, "copy", params! {}, ChannelKind::Input, 0, 0).unwrap();
    engine.start_playback(audio, SoundScope::Playback).unwrap();
    engine.start().unwrap();

    let editor = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let (mut applied, mut refused, mut count) = (0, 0, 1);
            for _ in 0..200 {
                let next = if count == 1 { 2 } else { 1 };
                match engine.resize_audio_channels(audio, next, count) {
                    Ok(_) => {
                        count = next;
                        applied += 1;
                    }
                    Err(err) => {
                        assert!(err.is_busy(), "unexpected error: {err}");
                        refused += 1;
                    }
                }
                thread::yield_now();
            }
            (applied, refused, count)
        })
    };
    let (applied, refused, count) = editor.join().unwrap();
    engine.stop();

    assert_eq!(applied + refused, 200);
    let graph = engine.graph();
    let a = graph.audio(audio).unwrap();
    assert!(a.is_consistent());
    assert_eq!(a.audio_channels(), count);
    assert!(engine.metrics().tics > 0);
    assert_eq!(engine.metrics().failures, 0);
    assert!(engine.check_isolation().is_empty());
}

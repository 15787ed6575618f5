//! Structural tasks queued by any thread and applied between tics.

use crate::{Result, WorkerError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tactus_core::{
    AudioId, ChannelId, ChannelKind, ContainerId, ContextId, EngineContext, PortValue, RecallKey,
    RecallParams, ResizeReport, SoundScope,
};

/// What a task does to its target audio.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    ResizeAudioChannels {
        new_count: usize,
        old_count: usize,
    },
    ResizePads {
        kind: ChannelKind,
        new_count: usize,
        old_count: usize,
    },
    /// Parameters travel in [`Task::params`].
    MapRecall {
        name: String,
        kind: ChannelKind,
        audio_channel_start: usize,
        pad_start: usize,
    },
    CancelRecall(RecallKey),
    CancelChannel(ChannelId),
    StartPlayback(SoundScope),
    StopPlayback(SoundScope),
    Link {
        input: ChannelId,
        output: ChannelId,
    },
    Unlink(ChannelId),
    /// Not structural; never counts against the per-target limit.
    WritePort {
        container: ContainerId,
        port: String,
        value: PortValue,
    },
}

impl TaskKind {
    pub fn is_structural(&self) -> bool {
        !matches!(self, TaskKind::WritePort { .. })
    }
}

/// A queued task: kind, the audio it mutates, and recall parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: TaskKind,
    pub target: AudioId,
    pub params: RecallParams,
}

impl Task {
    pub fn new(target: AudioId, kind: TaskKind) -> Self {
        Self {
            kind,
            target,
            params: RecallParams::new(),
        }
    }

    pub fn resize_audio_channels(audio: AudioId, new_count: usize, old_count: usize) -> Self {
        Self::new(audio, TaskKind::ResizeAudioChannels { new_count, old_count })
    }

    pub fn resize_pads(audio: AudioId, kind: ChannelKind, new_count: usize, old_count: usize) -> Self {
        Self::new(
            audio,
            TaskKind::ResizePads {
                kind,
                new_count,
                old_count,
            },
        )
    }

    pub fn map_recall(
        audio: AudioId,
        name: impl Into<String>,
        params: RecallParams,
        kind: ChannelKind,
        audio_channel_start: usize,
        pad_start: usize,
    ) -> Self {
        Self {
            kind: TaskKind::MapRecall {
                name: name.into(),
                kind,
                audio_channel_start,
                pad_start,
            },
            target: audio,
            params,
        }
    }

    pub fn cancel_recall(audio: AudioId, recall: RecallKey) -> Self {
        Self::new(audio, TaskKind::CancelRecall(recall))
    }

    pub fn cancel_channel(audio: AudioId, channel: ChannelId) -> Self {
        Self::new(audio, TaskKind::CancelChannel(channel))
    }

    pub fn start_playback(audio: AudioId, scope: SoundScope) -> Self {
        Self::new(audio, TaskKind::StartPlayback(scope))
    }

    pub fn stop_playback(audio: AudioId, scope: SoundScope) -> Self {
        Self::new(audio, TaskKind::StopPlayback(scope))
    }

    /// `audio` owns `input`.
    pub fn link(audio: AudioId, input: ChannelId, output: ChannelId) -> Self {
        Self::new(audio, TaskKind::Link { input, output })
    }

    pub fn unlink(audio: AudioId, channel: ChannelId) -> Self {
        Self::new(audio, TaskKind::Unlink(channel))
    }

    pub fn write_port(audio: AudioId, container: ContainerId, port: impl Into<String>, value: PortValue) -> Self {
        Self::new(
            audio,
            TaskKind::WritePort {
                container,
                port: port.into(),
                value,
            },
        )
    }

    /// Apply the task. Runs between tics only.
    pub fn apply(&self, engine: &EngineContext) -> tactus_core::Result<TaskOutcome> {
        let audio = self.target;
        Ok(match &self.kind {
            TaskKind::ResizeAudioChannels { new_count, old_count } => {
                TaskOutcome::Resized(engine.resize_audio_channels(audio, *new_count, *old_count)?)
            }
            TaskKind::ResizePads {
                kind,
                new_count,
                old_count,
            } => TaskOutcome::Resized(engine.resize_pads(audio, *kind, *new_count, *old_count)?),
            TaskKind::MapRecall {
                name,
                kind,
                audio_channel_start,
                pad_start,
            } => TaskOutcome::Container(engine.map_recall(
                audio,
                name,
                self.params.clone(),
                *kind,
                *audio_channel_start,
                *pad_start,
            )?),
            TaskKind::CancelRecall(key) => {
                engine.cancel_recall(*key)?;
                TaskOutcome::Done
            }
            TaskKind::CancelChannel(channel) => {
                engine.cancel_channel(*channel)?;
                TaskOutcome::Done
            }
            TaskKind::StartPlayback(scope) => TaskOutcome::Context(engine.start_playback(audio, *scope)?),
            TaskKind::StopPlayback(scope) => {
                engine.stop_playback(audio, *scope)?;
                TaskOutcome::Done
            }
            TaskKind::Link { input, output } => {
                engine.link(*input, *output)?;
                TaskOutcome::Done
            }
            TaskKind::Unlink(channel) => {
                engine.unlink(*channel)?;
                TaskOutcome::Done
            }
            TaskKind::WritePort {
                container,
                port,
                value,
            } => {
                engine.write_port(*container, port, value.clone())?;
                TaskOutcome::Done
            }
        })
    }
}

/// Result of an applied task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done,
    Resized(ResizeReport),
    Container(ContainerId),
    Context(ContextId),
}

type Reply = Sender<tactus_core::Result<TaskOutcome>>;

/// Receipt for a queued task.
pub struct TaskTicket {
    rx: Receiver<tactus_core::Result<TaskOutcome>>,
}

impl TaskTicket {
    /// Block until the task ran.
    pub fn wait(self) -> Result<TaskOutcome> {
        match self.rx.recv() {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkerError::TaskDropped),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<TaskOutcome>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result.map_err(WorkerError::from)),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Some(Err(WorkerError::TaskDropped)),
        }
    }

    /// Result if the task already ran.
    pub fn try_result(&self) -> Option<Result<TaskOutcome>> {
        self.rx.try_recv().ok().map(|r| r.map_err(WorkerError::from))
    }
}

/// Multi-producer task queue drained by the audio loop between tics.
pub struct TaskQueue {
    tx: Sender<(Task, Reply)>,
    rx: Receiver<(Task, Reply)>,
    deferred: Mutex<VecDeque<(Task, Reply)>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    pub fn submit(&self, task: Task) -> TaskTicket {
        let (reply, rx) = crossbeam_channel::bounded(1);
        let _ = self.tx.send((task, reply));
        TaskTicket { rx }
    }

    /// Tasks waiting, including those deferred to the next boundary.
    pub fn pending(&self) -> usize {
        self.rx.len() + self.deferred.lock().len()
    }

    /// Apply up to `budget` tasks, at most one structural task per target.
    ///
    /// A second structural task for an already touched target is deferred to
    /// the next boundary, ahead of newly queued tasks. Returns the number of
    /// tasks applied.
    pub fn drain(&self, engine: &EngineContext, budget: usize) -> usize {
        let mut touched: HashSet<AudioId> = HashSet::new();
        let mut postponed = VecDeque::new();
        let mut applied = 0;

        let mut backlog = std::mem::take(&mut *self.deferred.lock());
        while applied < budget {
            let Some((task, reply)) = backlog.pop_front().or_else(|| self.rx.try_recv().ok()) else {
                break;
            };
            if task.kind.is_structural() && !touched.insert(task.target) {
                postponed.push_back((task, reply));
                continue;
            }

            let result = task.apply(engine);
            match &result {
                Ok(_) => tracing::debug!(target_audio = %task.target, kind = ?task.kind, "applied task"),
                Err(err) => tracing::warn!(target_audio = %task.target, kind = ?task.kind, error = %err, "task failed"),
            }
            let _ = reply.send(result);
            applied += 1;
        }

        postponed.extend(backlog);
        *self.deferred.lock() = postponed;
        applied
    }
}

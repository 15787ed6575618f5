//! Stage dispatch and child mapping.

use super::tree::RecallNode;
use super::{MapChild, RecallEvent, RecallState, RecallTarget, RecallTree, TicInfo, WorkUnit};
use crate::audio_signal::{AudioSignal, SignalTiming};
use crate::context::{ContextTree, RecyclingContext};
use crate::error::{PortError, RecallError, RecallResult};
use crate::graph::AudioGraph;
use crate::port::{Port, PortSet};
use crate::recall_id::{RecallIdEntry, RecallIdRegistry};
use crate::recycling::Recycling;
use crate::{ChannelId, ContextId, RecallId, RecallKey, RecyclingId, SignalId, SoundScope, Stage};
use std::sync::Arc;

/// Everything a stage reads: a graph snapshot plus the shared registries.
pub struct RunEnv<'a> {
    pub graph: &'a AudioGraph,
    pub contexts: &'a ContextTree,
    pub recall_ids: &'a RecallIdRegistry,
    pub recalls: &'a RecallTree,
    pub tic: TicInfo,
}

/// Handle a recall receives in its stage callbacks.
pub struct RunContext<'a> {
    env: &'a RunEnv<'a>,
    context: Arc<RecyclingContext>,
    stage: Stage,
    key: RecallKey,
    entry: RecallIdEntry,
    target: RecallTarget,
    ports: Arc<PortSet>,
    done: bool,
}

impl<'a> RunContext<'a> {
    fn new(
        env: &'a RunEnv<'a>,
        context: Arc<RecyclingContext>,
        stage: Stage,
        node: &RecallNode,
        entry: RecallIdEntry,
    ) -> Self {
        Self {
            env,
            context,
            stage,
            key: node.key,
            entry,
            target: node.target,
            ports: Arc::clone(&node.ports),
            done: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tic(&self) -> TicInfo {
        self.env.tic
    }

    pub fn key(&self) -> RecallKey {
        self.key
    }

    pub fn recall_id(&self) -> RecallId {
        self.entry.id
    }

    pub fn run_order(&self) -> u32 {
        self.entry.run_order
    }

    pub fn sound_scope(&self) -> SoundScope {
        self.entry.scope
    }

    pub fn context(&self) -> &RecyclingContext {
        &self.context
    }

    pub fn target(&self) -> RecallTarget {
        self.target
    }

    pub fn ports(&self) -> &Arc<PortSet> {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Result<&Arc<Port>, PortError> {
        self.ports.get(name)
    }

    pub fn graph(&self) -> &AudioGraph {
        self.env.graph
    }

    /// Recall ids bound to the direct children of this context.
    pub fn child_recall_ids(&self) -> Vec<RecallId> {
        self.context
            .children()
            .iter()
            .flat_map(|c| self.env.recall_ids.in_context(*c))
            .collect()
    }

    pub fn recycling(&self, id: RecyclingId) -> RecallResult<&Arc<Recycling>> {
        self.env
            .graph
            .recycling(id)
            .ok_or(RecallError::UnknownRecycling(id))
    }

    /// Recyclings of `channel` taking part in this context or a direct child.
    pub fn channel_recyclings(&self, channel: ChannelId) -> Vec<RecyclingId> {
        self.env
            .graph
            .channel(channel)
            .map(|ch| {
                ch.recyclings()
                    .iter()
                    .copied()
                    .filter(|r| self.in_scope(*r))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn in_scope(&self, recycling: RecyclingId) -> bool {
        self.context.contains(recycling)
            || self.env.contexts.find_child(self.context.id(), recycling).is_some()
    }

    /// Allocate a signal in `recycling` tagged to this recall id.
    pub fn create_signal(&self, recycling: RecyclingId) -> RecallResult<SignalId> {
        self.recycling(recycling)?
            .create_audio_signal_with_defaults(&self.entry, &self.context)
    }

    pub fn create_signal_with_timing(
        &self,
        recycling: RecyclingId,
        timing: SignalTiming,
    ) -> RecallResult<SignalId> {
        self.recycling(recycling)?
            .create_audio_signal(&self.entry, &self.context, timing)
    }

    /// Signals of `recycling` visible from this context, in list order.
    pub fn signals(&self, recycling: RecyclingId) -> RecallResult<Vec<SignalId>> {
        Ok(self.recycling(recycling)?.find_by_contexts(&self.visible_contexts()))
    }

    /// Signals of `recycling` created by this recall id.
    pub fn own_signals(&self, recycling: RecyclingId) -> RecallResult<Vec<SignalId>> {
        Ok(self.recycling(recycling)?.find_by_recall_id(self.entry.id))
    }

    fn visible_contexts(&self) -> Vec<ContextId> {
        let mut visible = Vec::with_capacity(1 + self.context.children().len());
        visible.push(self.context.id());
        visible.extend_from_slice(self.context.children());
        visible
    }

    fn check_visible(&self, recycling: &Recycling, signal: SignalId) -> RecallResult {
        match recycling.signal_context(signal) {
            Some(Some(tag)) if self.env.contexts.is_visible(self.context.id(), tag) => Ok(()),
            Some(Some(tag)) => Err(RecallError::CrossScopeSignal {
                signal,
                signal_context: tag,
                context: self.context.id(),
            }),
            _ => Err(RecallError::UnknownSignal(signal, recycling.id())),
        }
    }

    /// Mutate a signal visible from this context.
    pub fn with_signal<R>(
        &self,
        recycling: RecyclingId,
        signal: SignalId,
        f: impl FnOnce(&mut AudioSignal) -> R,
    ) -> RecallResult<R> {
        let r = self.recycling(recycling)?;
        self.check_visible(r, signal)?;
        r.with_signal(signal, f)
            .ok_or(RecallError::UnknownSignal(signal, recycling))
    }

    pub fn read_signal<R>(
        &self,
        recycling: RecyclingId,
        signal: SignalId,
        f: impl FnOnce(&AudioSignal) -> R,
    ) -> RecallResult<R> {
        let r = self.recycling(recycling)?;
        self.check_visible(r, signal)?;
        r.read_signal(signal, f)
            .ok_or(RecallError::UnknownSignal(signal, recycling))
    }

    pub fn remove_signal(&self, recycling: RecyclingId, signal: SignalId) -> RecallResult<bool> {
        let r = self.recycling(recycling)?;
        self.check_visible(r, signal)?;
        Ok(r.remove_signal(signal))
    }

    /// Complete this recall once the current callback returns.
    pub fn mark_done(&mut self) {
        self.done = true;
    }
}

/// Invoke one stage on one recall node.
///
/// Templates never run. Done and removing recalls are skipped. A recall whose
/// ability does not include the context's sound scope is a no-op, and any
/// other stage before `run_init` completed fails with `NotReady`. Children are
/// mapped right after a successful `run_pre`.
pub fn run_stage(env: &RunEnv<'_>, key: RecallKey, stage: Stage) -> RecallResult {
    let node = env.recalls.node(key).ok_or(RecallError::UnknownRecall(key))?;
    let done = {
        let mut guard = node.lock();
        let n = &mut *guard;
        match n.state {
            RecallState::Template => {
                tracing::warn!(recall = %key, name = %n.name, "template recalls never run");
                return Ok(());
            }
            RecallState::Done | RecallState::Removing | RecallState::Freed => return Ok(()),
            _ => {}
        }
        let entry = n.recall_id.ok_or(RecallError::UnknownRecall(key))?;
        if !n.ability.contains(entry.scope) {
            return Ok(());
        }
        match (n.state, stage) {
            (RecallState::Running, Stage::Init) => return Ok(()),
            (RecallState::Instantiated | RecallState::Initializing, s) if s != Stage::Init => {
                return Err(RecallError::NotReady(key, stage));
            }
            _ => {}
        }
        let context = env
            .contexts
            .get(entry.context)
            .ok_or(RecallError::UnknownContext(entry.context))?;

        let mut cx = RunContext::new(env, Arc::clone(&context), stage, n, entry);
        if stage == Stage::Init {
            n.state = n.state.transition(RecallEvent::BeginInit)?;
            let result = n.behavior.run_init(&mut cx);
            let event = if result.is_ok() {
                RecallEvent::InitComplete
            } else {
                RecallEvent::InitFailed
            };
            n.state = n.state.transition(event)?;
            result?;
        } else {
            n.behavior.run_stage(stage, &mut cx)?;
        }
        let done = cx.done;
        drop(cx);

        if stage == Stage::Pre {
            map_children(env, &context, n)?;
        }
        done
    };

    if done {
        env.recalls.done(key);
    }
    Ok(())
}

/// Run `stage` over a node and its children: top-down for `Init`, `Pre` and
/// `Inter`, bottom-up for `Post`. Instances still waiting for `run_init` get
/// it first, so children mapped during `run_pre` run in the same tic.
pub fn run_tree(env: &RunEnv<'_>, key: RecallKey, stage: Stage) -> RecallResult {
    let Some(state) = env.recalls.state(key) else {
        return Ok(());
    };
    if !state.is_runnable() {
        return Ok(());
    }
    if state == RecallState::Instantiated && stage != Stage::Init {
        run_stage(env, key, Stage::Init)?;
    }

    if stage == Stage::Post {
        for child in env.recalls.children(key) {
            run_tree(env, child, stage)?;
        }
        run_stage(env, key, stage)
    } else {
        run_stage(env, key, stage)?;
        for child in env.recalls.children(key) {
            run_tree(env, child, stage)?;
        }
        Ok(())
    }
}

/// Run `stage` for every instance of one unit, in run order.
///
/// A failing instance does not stop the others; the first error is returned
/// once the whole unit has been visited.
pub fn run_unit(env: &RunEnv<'_>, unit: WorkUnit, stage: Stage) -> RecallResult {
    let context = env
        .contexts
        .get(unit.context)
        .ok_or(RecallError::UnknownContext(unit.context))?;
    let _depth = context.enter();

    let mut first_error = None;
    for key in env.recalls.roots_for_unit(unit.context, unit.target) {
        if let Err(err) = run_tree(env, key, stage) {
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Bring `node`'s children in line with its bound context: one child per
/// target present, cancelling children whose target disappeared.
fn map_children(env: &RunEnv<'_>, context: &RecyclingContext, node: &mut RecallNode) -> RecallResult {
    let wanted = match node.target {
        RecallTarget::Channel {
            channel,
            destination,
        } => recycling_targets(env, context, channel, destination),
        RecallTarget::Recycling {
            source,
            destination,
        } => {
            let side = node
                .map_child
                .ok_or_else(|| RecallError::MissingMapChild(node.name.clone()))?;
            let own = node.recall_id.map(|e| e.id);
            signal_targets(env, context, side, source, destination, own)
        }
        RecallTarget::Audio(_) | RecallTarget::Signal { .. } => return Ok(()),
    };

    let stale: Vec<RecallKey> = node
        .children
        .iter()
        .filter(|(target, _)| !wanted.contains(target))
        .map(|(_, key)| *key)
        .collect();
    for key in stale {
        if env.recalls.contains(key) {
            env.recalls.cancel(key)?;
        }
    }

    for target in wanted {
        // a cancelled or finished child no longer covers its target
        let covered = node
            .children
            .iter()
            .any(|(t, key)| *t == target && env.recalls.state(*key).is_some_and(RecallState::is_runnable));
        if covered {
            continue;
        }
        if let Some(behavior) = node.behavior.new_child(&target) {
            let child = env.recalls.attach_child(node, target, behavior);
            tracing::debug!(parent = %node.key, child = %child, ?target, "mapped child recall");
        }
    }
    Ok(())
}

fn recycling_targets(
    env: &RunEnv<'_>,
    context: &RecyclingContext,
    channel: ChannelId,
    destination: Option<ChannelId>,
) -> Vec<RecallTarget> {
    let Some(ch) = env.graph.channel(channel) else {
        return Vec::new();
    };
    let destination = destination.and_then(|d| env.graph.channel(d));
    ch.recyclings()
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            context.contains(**r) || env.contexts.find_child(context.id(), **r).is_some()
        })
        .map(|(i, r)| RecallTarget::Recycling {
            source: *r,
            destination: destination.and_then(|d| d.recyclings().get(i).copied()),
        })
        .collect()
}

fn signal_targets(
    env: &RunEnv<'_>,
    context: &RecyclingContext,
    side: MapChild,
    source: RecyclingId,
    destination: Option<RecyclingId>,
    own: Option<RecallId>,
) -> Vec<RecallTarget> {
    let mapped = match side {
        MapChild::Source => Some(source),
        MapChild::Destination => destination,
    };
    let Some(recycling) = mapped.and_then(|id| env.graph.recycling(id)) else {
        return Vec::new();
    };
    // Sources follow every visible signal, destinations only what this recall produces.
    let signals = match (side, own) {
        (MapChild::Destination, Some(own)) => recycling.find_by_recall_id(own),
        _ => {
            let mut visible = vec![context.id()];
            visible.extend_from_slice(context.children());
            recycling.find_by_contexts(&visible)
        }
    };
    signals
        .into_iter()
        .map(|signal| RecallTarget::Signal {
            recycling: recycling.id(),
            signal,
        })
        .collect()
}

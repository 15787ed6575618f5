//! Engine context: the one explicitly constructed owner of every manager.
//!
//! Structural edits (graph changes, mapping, playback, cancellation) serialize
//! on the graph lock and publish a fresh graph snapshot. The tic reads that
//! snapshot plus the lock-free context tree and never takes the graph lock.

use crate::audio_signal::SignalParams;
use crate::config::EngineConfig;
use crate::context::ContextTree;
use crate::error::{BusyReason, GraphError, RecallError, RecallResult, Result};
use crate::graph::{AudioGraph, AudioSpec, ChannelKind, ResizeReport};
use crate::lockfree::AtomicFlag;
use crate::playback::PlaybackDomain;
use crate::port::{PortSet, PortValue};
use crate::recall::{
    self, ContainerRegistry, MappedRecall, ReapReport, RecallContainer, RecallFactory,
    RecallParams, RecallRegistry, RecallState, RecallTarget, RecallTree, RunEnv, TicInfo,
    WorkUnit,
};
use crate::recall_id::{RecallIdEntry, RecallIdRegistry};
use crate::{
    AudioId, ChannelId, ContainerId, ContextId, RecallId, RecallKey, RecyclingId, SignalId,
    SoundScope, Stage,
};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Signal found outside the single context it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationViolation {
    Untagged {
        signal: SignalId,
        recycling: RecyclingId,
    },
    UnknownContext {
        signal: SignalId,
        context: ContextId,
    },
    NotListed {
        signal: SignalId,
        recycling: RecyclingId,
        context: ContextId,
    },
}

/// Busy flags raised for the audios a tic runs over; cleared on drop.
#[must_use]
pub struct TicGuard {
    flags: Vec<Arc<AtomicFlag>>,
}

impl Drop for TicGuard {
    fn drop(&mut self) {
        for flag in &self.flags {
            flag.set(false);
        }
    }
}

pub struct EngineContext {
    config: EngineConfig,
    graph: Mutex<AudioGraph>,
    snapshot: ArcSwap<AudioGraph>,
    contexts: ContextTree,
    recall_ids: RecallIdRegistry,
    recalls: RecallTree,
    containers: ContainerRegistry,
    registry: RecallRegistry,
    playback: DashMap<AudioId, PlaybackDomain>,
    tic: AtomicU64,
}

impl EngineContext {
    pub fn new(config: EngineConfig, registry: RecallRegistry) -> Self {
        Self {
            config,
            graph: Mutex::new(AudioGraph::new()),
            snapshot: ArcSwap::from_pointee(AudioGraph::new()),
            contexts: ContextTree::new(),
            recall_ids: RecallIdRegistry::new(),
            recalls: RecallTree::new(),
            containers: ContainerRegistry::new(),
            registry,
            playback: DashMap::new(),
            tic: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest published graph.
    pub fn graph(&self) -> Arc<AudioGraph> {
        self.snapshot.load_full()
    }

    pub fn contexts(&self) -> &ContextTree {
        &self.contexts
    }

    pub fn recall_ids(&self) -> &RecallIdRegistry {
        &self.recall_ids
    }

    pub fn recalls(&self) -> &RecallTree {
        &self.recalls
    }

    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    pub fn registry(&self) -> &RecallRegistry {
        &self.registry
    }

    pub fn playback(&self, audio: AudioId) -> Option<PlaybackDomain> {
        self.playback.get(&audio).map(|d| d.clone())
    }

    pub fn tic_count(&self) -> u64 {
        self.tic.load(Ordering::Acquire)
    }

    /// Advance the global tic counter, returning the new tic.
    pub fn next_tic(&self) -> u64 {
        self.tic.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn publish(&self, graph: &AudioGraph) {
        self.snapshot.store(Arc::new(graph.clone()));
    }

    fn edit<R>(&self, f: impl FnOnce(&mut AudioGraph) -> Result<R>) -> Result<R> {
        let mut graph = self.graph.lock();
        let result = f(&mut graph)?;
        self.publish(&graph);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    pub fn add_audio(&self, spec: AudioSpec) -> AudioId {
        let defaults = self.config.signal_params();
        let mut graph = self.graph.lock();
        let id = graph.add_audio(spec, defaults);
        self.publish(&graph);
        id
    }

    /// Remove an audio with every recall, signal and context entry it owns.
    pub fn remove_audio(&self, audio: AudioId) -> Result<()> {
        let mut graph = self.graph.lock();
        graph.ensure_idle(audio)?;

        if let Some(domain) = self.playback(audio) {
            for scope in SoundScope::ALL {
                if let Some(root) = domain.context(scope) {
                    self.stop_context_tree(&graph, root)?;
                }
            }
        }
        let channels: Vec<ChannelId> = graph
            .audio(audio)
            .map(|a| {
                a.channels(ChannelKind::Output)
                    .iter()
                    .chain(a.channels(ChannelKind::Input))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        let audio_templates = graph.audio(audio).map(|a| a.recalls().to_vec()).unwrap_or_default();
        for template in audio_templates {
            self.cancel_template(&mut graph, template)?;
        }
        self.retire_channels(&mut graph, &channels)?;
        graph.remove_audio(audio)?;
        self.playback.remove(&audio);
        self.publish(&graph);
        tracing::info!(audio = %audio, "removed audio");
        Ok(())
    }

    pub fn link(&self, input: ChannelId, output: ChannelId) -> Result<()> {
        self.edit(|graph| Ok(graph.link(input, output)?))
    }

    pub fn unlink(&self, channel: ChannelId) -> Result<()> {
        self.edit(|graph| Ok(graph.unlink(channel)?))
    }

    /// Propagate samplerate, buffer size and format to an audio's recyclings.
    pub fn set_params(&self, audio: AudioId, params: SignalParams) -> Result<()> {
        self.edit(|graph| Ok(graph.set_params(audio, params)?))
    }

    pub fn set_samplerate(&self, audio: AudioId, samplerate: u32) -> Result<()> {
        self.update_params(audio, |p| p.samplerate = samplerate)
    }

    pub fn set_buffer_size(&self, audio: AudioId, buffer_size: usize) -> Result<()> {
        self.update_params(audio, |p| p.buffer_size = buffer_size)
    }

    pub fn set_format(&self, audio: AudioId, format: crate::SoundFormat) -> Result<()> {
        self.update_params(audio, |p| p.format = format)
    }

    fn update_params(&self, audio: AudioId, f: impl FnOnce(&mut SignalParams)) -> Result<()> {
        self.edit(|graph| {
            let mut params = graph
                .audio(audio)
                .ok_or(GraphError::UnknownAudio(audio))?
                .params();
            f(&mut params);
            Ok(graph.set_params(audio, params)?)
        })
    }

    /// Change the audio channel count from `old_count` to `new_count`.
    ///
    /// Growth maps every recall family of the audio onto the new channels
    /// only and binds them into the contexts the audio runs in. Shrinking
    /// cancels and reaps the recalls of the removed channels before freeing
    /// them. An equal count is a no-op; a busy audio is refused.
    pub fn resize_audio_channels(
        &self,
        audio: AudioId,
        new_count: usize,
        old_count: usize,
    ) -> Result<ResizeReport> {
        let mut graph = self.graph.lock();
        graph.ensure_idle(audio)?;
        let current = graph
            .audio(audio)
            .ok_or(GraphError::UnknownAudio(audio))?
            .audio_channels();
        if current != old_count {
            return Err(GraphError::CountMismatch {
                expected: current,
                found: old_count,
            }
            .into());
        }
        if new_count == old_count {
            return Ok(ResizeReport::default());
        }

        let contexts = self.contexts_of(&graph, audio);
        if new_count < old_count {
            let doomed = graph.channels_beyond_audio_channel(audio, new_count);
            self.retire_channels(&mut graph, &doomed)?;
        }
        let report = graph.resize_audio_channels(audio, new_count, old_count)?;
        if new_count > old_count {
            self.extend_channels(&mut graph, audio, &report, &contexts)?;
        }
        self.sync_playbacks(&graph, audio);
        self.publish(&graph);
        Ok(report)
    }

    /// Change the pad count of `kind` from `old_count` to `new_count`.
    pub fn resize_pads(
        &self,
        audio: AudioId,
        kind: ChannelKind,
        new_count: usize,
        old_count: usize,
    ) -> Result<ResizeReport> {
        let mut graph = self.graph.lock();
        graph.ensure_idle(audio)?;
        let current = graph
            .audio(audio)
            .ok_or(GraphError::UnknownAudio(audio))?
            .pads(kind);
        if current != old_count {
            return Err(GraphError::CountMismatch {
                expected: current,
                found: old_count,
            }
            .into());
        }
        if new_count == old_count {
            return Ok(ResizeReport::default());
        }

        let contexts = self.contexts_of(&graph, audio);
        if new_count < old_count {
            let doomed = graph.channels_beyond_pad(audio, kind, new_count);
            self.retire_channels(&mut graph, &doomed)?;
        }
        let report = graph.resize_pads(audio, kind, new_count, old_count)?;
        if new_count > old_count {
            self.extend_channels(&mut graph, audio, &report, &contexts)?;
        }
        self.sync_playbacks(&graph, audio);
        self.publish(&graph);
        Ok(report)
    }

    /// Contexts listing any recycling of `audio`.
    fn contexts_of(&self, graph: &AudioGraph, audio: AudioId) -> Vec<ContextId> {
        let owned: HashSet<RecyclingId> = graph.recyclings_of(audio).into_iter().collect();
        let mut contexts: Vec<ContextId> = self
            .contexts
            .snapshot()
            .values()
            .filter(|ctx| ctx.recyclings().iter().any(|r| owned.contains(r)))
            .map(|ctx| ctx.id())
            .collect();
        contexts.sort();
        contexts
    }

    /// Cancel and reap every recall of `channels`, then drop their recyclings
    /// from every context.
    fn retire_channels(&self, graph: &mut AudioGraph, channels: &[ChannelId]) -> Result<()> {
        let mut recyclings = Vec::new();
        for id in channels {
            let Some(channel) = graph.channel(*id) else {
                continue;
            };
            if channel.owns_recycling() {
                recyclings.extend(channel.recyclings().iter().copied());
            }
            for template in channel.recalls().to_vec() {
                self.cancel_template(graph, template)?;
            }
        }
        self.reap_with(graph);

        if !recyclings.is_empty() {
            for ctx in self.contexts.snapshot().values() {
                if ctx.recyclings().iter().any(|r| recyclings.contains(r)) {
                    self.contexts.remove_recyclings(ctx.id(), &recyclings)?;
                }
            }
        }
        Ok(())
    }

    /// Give channels added by a resize their recall templates, append their
    /// recyclings to the audio's live contexts and bind the new templates.
    fn extend_channels(
        &self,
        graph: &mut AudioGraph,
        audio: AudioId,
        report: &ResizeReport,
        contexts: &[ContextId],
    ) -> Result<()> {
        let mapped = graph.audio(audio).map(|a| a.mapped().to_vec()).unwrap_or_default();
        let mut templates = Vec::new();
        for channel in &report.added {
            let Some(kind) = graph.channel(*channel).map(|ch| ch.kind()) else {
                continue;
            };
            for m in mapped.iter().filter(|m| m.kind == kind) {
                let factory = self.registry.get(&m.name)?;
                let ports = self
                    .containers
                    .ports(m.container)
                    .unwrap_or_else(PortSet::empty);
                if let Some(key) =
                    self.add_channel_template(graph, &*factory, *channel, &ports, &m.params, m.container)?
                {
                    templates.push(key);
                }
            }
        }

        for ctx in contexts {
            if !report.added_recyclings.is_empty() {
                self.contexts.reset_recycling(*ctx, None, &report.added_recyclings)?;
            }
            for template in &templates {
                self.bind(*template, *ctx)?;
            }
        }
        tracing::debug!(audio = %audio, templates = templates.len(), contexts = contexts.len(), "mapped recalls onto new channels");
        Ok(())
    }

    fn sync_playbacks(&self, graph: &AudioGraph, audio: AudioId) {
        if let (Some(a), Some(mut domain)) = (graph.audio(audio), self.playback.get_mut(&audio)) {
            domain.sync_outputs(a.channels(ChannelKind::Output));
        }
    }

    // ------------------------------------------------------------------
    // Recalls
    // ------------------------------------------------------------------

    /// Map a registered recall family onto an audio.
    ///
    /// Creates the audio template (if the family has one) and one channel
    /// template per `kind` channel from `audio_channel_start`/`pad_start` on,
    /// all sharing one container's ports. Templates are bound right away into
    /// every context the audio already runs in.
    pub fn map_recall(
        &self,
        audio: AudioId,
        name: &str,
        params: RecallParams,
        kind: ChannelKind,
        audio_channel_start: usize,
        pad_start: usize,
    ) -> Result<ContainerId> {
        let factory = self.registry.get(name)?;
        let ports = Arc::new(PortSet::new(factory.ports(&params)?));

        let mut graph = self.graph.lock();
        graph.ensure_idle(audio)?;
        let channels: Vec<ChannelId> = graph
            .audio(audio)
            .ok_or(GraphError::UnknownAudio(audio))?
            .channels(kind)
            .iter()
            .copied()
            .filter(|id| {
                graph
                    .channel(*id)
                    .is_some_and(|ch| ch.pad() >= pad_start && ch.audio_channel() >= audio_channel_start)
            })
            .collect();

        let container = self.containers.insert(RecallContainer::new(
            name,
            audio,
            params.clone(),
            Arc::clone(&ports),
        ));
        let mut templates = Vec::new();
        if let Some(behavior) = factory.audio_recall(audio, &ports, &params)? {
            let target = RecallTarget::Audio(audio);
            let key = self.recalls.insert_template(
                behavior,
                target,
                Arc::clone(&ports),
                factory.flags(),
                Some(container),
            )?;
            graph.attach_recall(&target, key)?;
            self.containers.add_template(container, key);
            templates.push(key);
        }
        for channel in channels {
            if let Some(key) =
                self.add_channel_template(&mut graph, &*factory, channel, &ports, &params, container)?
            {
                templates.push(key);
            }
        }
        graph.push_mapped(
            audio,
            MappedRecall {
                name: name.to_string(),
                kind,
                params,
                container,
            },
        )?;

        for ctx in self.contexts_of(&graph, audio) {
            for template in &templates {
                self.bind(*template, ctx)?;
            }
        }
        self.publish(&graph);
        tracing::debug!(audio = %audio, recall = name, container = %container, templates = templates.len(), "mapped recall");
        Ok(container)
    }

    fn add_channel_template(
        &self,
        graph: &mut AudioGraph,
        factory: &dyn RecallFactory,
        channel: ChannelId,
        ports: &Arc<PortSet>,
        params: &RecallParams,
        container: ContainerId,
    ) -> Result<Option<RecallKey>> {
        let Some(ch) = graph.channel(channel) else {
            return Ok(None);
        };
        // Inputs write into the output at the same audio channel.
        let destination = match ch.kind() {
            ChannelKind::Input => graph
                .channel_at(ch.audio(), ChannelKind::Output, 0, ch.audio_channel())
                .map(|o| o.id()),
            ChannelKind::Output => None,
        };
        let target = RecallTarget::Channel {
            channel,
            destination,
        };
        let Some(behavior) = factory.channel_recall(&target, ports, params)? else {
            return Ok(None);
        };
        let key = self.recalls.insert_template(
            behavior,
            target,
            Arc::clone(ports),
            factory.flags(),
            Some(container),
        )?;
        graph.attach_recall(&target, key)?;
        self.containers.add_template(container, key);
        Ok(Some(key))
    }

    /// Attach an already built template to an audio or channel.
    pub fn add_template(
        &self,
        behavior: Box<dyn recall::Recall>,
        target: RecallTarget,
        ports: Arc<PortSet>,
        flags: recall::RecallFlags,
    ) -> Result<RecallKey> {
        let mut graph = self.graph.lock();
        if let Some(audio) = graph.audio_of(&target) {
            graph.ensure_idle(audio)?;
        }
        let key = self.recalls.insert_template(behavior, target, ports, flags, None)?;
        graph.attach_recall(&target, key)?;
        self.publish(&graph);
        Ok(key)
    }

    /// Bind a template to a context, instantiating it once per pair.
    ///
    /// Binding the same pair again returns the same recall id and creates
    /// nothing new.
    pub fn bind(&self, template: RecallKey, context: ContextId) -> Result<RecallIdEntry> {
        let ctx = self
            .contexts
            .get(context)
            .ok_or(GraphError::UnknownContext(context))?;
        if !self.recalls.contains(template) {
            return Err(RecallError::UnknownRecall(template).into());
        }
        let (entry, created) = self.recall_ids.bind(template, context, ctx.tag());
        if created {
            if let Err(err) = self.recalls.instantiate(template, entry) {
                self.recall_ids.remove(entry.id);
                return Err(err.into());
            }
        }
        Ok(entry)
    }

    /// Cancel a template (with all its instances) or a single instance.
    pub fn cancel_recall(&self, key: RecallKey) -> Result<()> {
        let mut graph = self.graph.lock();
        let node = self
            .recalls
            .node(key)
            .ok_or(RecallError::UnknownRecall(key))?;
        let (target, is_template) = {
            let n = node.lock();
            (n.target(), n.is_template())
        };
        if let Some(audio) = graph.audio_of(&target) {
            graph.ensure_idle(audio)?;
        }
        if is_template {
            self.cancel_template(&mut graph, key)?;
        } else {
            self.recalls.cancel(key)?;
        }
        self.reap_with(&graph);
        self.publish(&graph);
        Ok(())
    }

    fn cancel_template(&self, graph: &mut AudioGraph, template: RecallKey) -> RecallResult {
        for entry in self.recall_ids.of_template(template) {
            if let Some(instance) = self.recalls.instance_of(entry.id) {
                self.recalls.cancel(instance)?;
            }
        }
        let (target, container) = match self.recalls.node(template) {
            Some(node) => {
                let n = node.lock();
                (n.target(), n.container())
            }
            None => return Ok(()),
        };
        self.recalls.cancel(template)?;
        graph.detach_recall(&target, template);
        if let Some(container) = container {
            self.containers.remove_template(container, template);
        }
        Ok(())
    }

    /// Cancel every running instance of the channel's templates. The
    /// templates stay, so the channel runs again on the next playback.
    pub fn cancel_channel(&self, channel: ChannelId) -> Result<()> {
        let graph = self.graph.lock();
        let ch = graph
            .channel(channel)
            .ok_or(GraphError::UnknownChannel(channel))?;
        graph.ensure_idle(ch.audio())?;
        for template in ch.recalls() {
            for entry in self.recall_ids.of_template(*template) {
                if let Some(instance) = self.recalls.instance_of(entry.id) {
                    self.recalls.cancel(instance)?;
                }
            }
        }
        self.reap_with(&graph);
        Ok(())
    }

    pub fn done(&self, key: RecallKey) -> bool {
        self.recalls.done(key)
    }

    pub fn resume(&self, key: RecallKey) -> Result<()> {
        Ok(self.recalls.resume(key)?)
    }

    pub fn stop_persistent(&self, key: RecallKey) -> bool {
        self.recalls.stop_persistent(key)
    }

    pub fn is_done(&self, context: ContextId) -> bool {
        self.recalls.is_done(context)
    }

    /// Free cancelled and completed recalls between tics, release their
    /// recall ids and signals, and destroy contexts that lost their last id.
    pub fn reap(&self) -> ReapReport {
        let graph = self.graph.lock();
        self.reap_with(&graph)
    }

    fn reap_with(&self, graph: &AudioGraph) -> ReapReport {
        let report = self.recalls.reap();
        let mut touched = Vec::new();
        for entry in &report.released {
            self.recall_ids.remove(entry.id);
            if let Some(ctx) = self.contexts.get(entry.context) {
                for r in ctx.recyclings() {
                    if let Some(recycling) = graph.recycling(*r) {
                        recycling.remove_by_recall_id(entry.id);
                    }
                }
            }
            if !touched.contains(&entry.context) {
                touched.push(entry.context);
            }
        }
        for context in touched {
            let orphaned = self.recall_ids.count_in(context) == 0
                && self.contexts.get(context).is_some_and(|c| !c.has_children());
            if orphaned {
                self.destroy_context(graph, context);
            }
        }
        report
    }

    fn destroy_context(&self, graph: &AudioGraph, context: ContextId) {
        if let Some(ctx) = self.contexts.get(context) {
            for r in ctx.recyclings() {
                if let Some(recycling) = graph.recycling(*r) {
                    recycling.remove_by_context(context);
                }
            }
        }
        if self.contexts.destroy(context).is_ok() {
            for mut domain in self.playback.iter_mut() {
                domain.forget(context);
            }
        }
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Create the context tree for playing `audio` in `scope` and bind every
    /// template of the audio and of its upstream audios.
    ///
    /// Upstream audios linked into the audio's inputs run in child contexts.
    /// Starting a scope that is already playing returns its context.
    pub fn start_playback(&self, audio: AudioId, scope: SoundScope) -> Result<ContextId> {
        let graph = self.graph.lock();
        if let Some(root) = self.playback(audio).and_then(|d| d.context(scope)) {
            return Ok(root);
        }
        let outputs = graph
            .audio(audio)
            .ok_or(GraphError::UnknownAudio(audio))?
            .channels(ChannelKind::Output)
            .to_vec();
        let mut members = vec![audio];
        let mut pending = vec![audio];
        while let Some(downstream) = pending.pop() {
            for upstream in graph.upstream_of(downstream) {
                members.push(upstream);
                pending.push(upstream);
            }
        }
        for member in &members {
            graph.ensure_idle(*member)?;
        }

        let root = self.contexts.create(graph.recyclings_of(audio), scope);
        let mut bound = vec![(root, audio)];
        let mut pending = vec![(root, audio)];
        while let Some((parent, downstream)) = pending.pop() {
            for upstream in graph.upstream_of(downstream) {
                let child = self
                    .contexts
                    .create_child(parent, graph.recyclings_of(upstream), scope)?;
                bound.push((child, upstream));
                pending.push((child, upstream));
            }
        }

        for (context, member) in &bound {
            for template in graph.templates_of(*member) {
                self.bind(template, *context)?;
            }
            let mut domain = self
                .playback
                .entry(*member)
                .or_insert_with(|| PlaybackDomain::new(*member, &[]));
            if *context == root {
                domain.set_context(scope, Some(root));
            } else {
                domain.add_nested(scope, *context);
            }
        }
        if let Some(mut domain) = self.playback.get_mut(&audio) {
            domain.sync_outputs(&outputs);
        }
        tracing::info!(audio = %audio, scope = scope.name(), context = %root, nested = bound.len() - 1, "started playback");
        Ok(root)
    }

    /// Cancel a playback, child contexts first.
    pub fn stop_playback(&self, audio: AudioId, scope: SoundScope) -> Result<()> {
        let Some(root) = self.playback(audio).and_then(|d| d.context(scope)) else {
            return Ok(());
        };
        let graph = self.graph.lock();
        self.stop_context_tree(&graph, root)?;
        tracing::info!(audio = %audio, scope = scope.name(), "stopped playback");
        Ok(())
    }

    fn stop_context_tree(&self, graph: &AudioGraph, root: ContextId) -> Result<()> {
        for context in self.contexts.descendants_postorder(root)? {
            self.cancel_context_with(graph, context)?;
        }
        Ok(())
    }

    /// Cancel everything bound to one context and destroy it.
    ///
    /// Refused with `Busy(LiveChildren)` while child contexts are alive and
    /// with `Busy(TicInFlight)` while a tic runs over any of its audios.
    pub fn cancel_context(&self, context: ContextId) -> Result<()> {
        let graph = self.graph.lock();
        self.cancel_context_with(&graph, context)
    }

    fn cancel_context_with(&self, graph: &AudioGraph, context: ContextId) -> Result<()> {
        let ctx = self
            .contexts
            .get(context)
            .ok_or(GraphError::UnknownContext(context))?;
        if ctx.has_children() {
            return Err(GraphError::Busy(BusyReason::LiveChildren).into());
        }
        for r in ctx.recyclings() {
            if let Some(audio) = graph.audio_of_recycling(*r) {
                graph.ensure_idle(audio)?;
            }
        }

        for id in self.recall_ids.in_context(context) {
            if let Some(instance) = self.recalls.instance_of(id) {
                self.recalls.cancel(instance)?;
            }
        }
        self.reap_with(graph);
        for id in self.recall_ids.in_context(context) {
            self.recall_ids.remove(id);
        }
        if self.contexts.contains(context) {
            self.destroy_context(graph, context);
        }
        tracing::debug!(context = %context, "cancelled context");
        Ok(())
    }

    /// Recall ids bound to the direct children of `context`.
    pub fn child_recall_ids(&self, context: ContextId) -> Vec<RecallId> {
        self.contexts
            .get(context)
            .map(|ctx| {
                ctx.children()
                    .iter()
                    .flat_map(|c| self.recall_ids.in_context(*c))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Tic
    // ------------------------------------------------------------------

    /// Toplevel contexts with something bound in them or below.
    pub fn active_roots(&self) -> Vec<ContextId> {
        let mut roots: Vec<ContextId> = self
            .contexts
            .snapshot()
            .values()
            .filter(|ctx| ctx.parent().is_none())
            .map(|ctx| ctx.id())
            .collect();
        roots.sort();
        roots
    }

    /// Work units of one context, in run order.
    pub fn units(&self, context: ContextId) -> Vec<WorkUnit> {
        self.recalls
            .units(context)
            .into_iter()
            .map(|target| WorkUnit { context, target })
            .collect()
    }

    /// Audios whose recyclings `contexts` list.
    pub fn audios_in(&self, graph: &AudioGraph, contexts: &[ContextId]) -> Vec<AudioId> {
        let mut audios = Vec::new();
        for context in contexts {
            if let Some(ctx) = self.contexts.get(*context) {
                for r in ctx.recyclings() {
                    if let Some(audio) = graph.audio_of_recycling(*r) {
                        if !audios.contains(&audio) {
                            audios.push(audio);
                        }
                    }
                }
            }
        }
        audios
    }

    /// Mark `audios` busy until the guard drops.
    ///
    /// Flags are raised under the graph lock, so an edit either completes
    /// before the guard exists or observes the busy flag and is refused.
    /// Read the snapshot again after taking the guard.
    pub fn tic_guard(&self, audios: &[AudioId]) -> TicGuard {
        let graph = self.graph.lock();
        let flags = audios
            .iter()
            .filter_map(|audio| graph.set_busy(*audio, true))
            .collect();
        TicGuard { flags }
    }

    pub fn run_env<'a>(&'a self, graph: &'a AudioGraph, tic: TicInfo) -> RunEnv<'a> {
        RunEnv {
            graph,
            contexts: &self.contexts,
            recall_ids: &self.recall_ids,
            recalls: &self.recalls,
            tic,
        }
    }

    pub fn run_unit(&self, unit: WorkUnit, stage: Stage, tic: TicInfo) -> RecallResult {
        let graph = self.graph();
        recall::run_unit(&self.run_env(&graph, tic), unit, stage)
    }

    /// Invoke one stage on one recall directly.
    pub fn run_stage(&self, key: RecallKey, stage: Stage) -> RecallResult {
        let graph = self.graph();
        let tic = TicInfo {
            tic: self.tic_count(),
            ..TicInfo::default()
        };
        recall::run_stage(&self.run_env(&graph, tic), key, stage)
    }

    pub fn state(&self, key: RecallKey) -> Option<RecallState> {
        self.recalls.state(key)
    }

    // ------------------------------------------------------------------
    // Ports and checks
    // ------------------------------------------------------------------

    pub fn write_port(&self, container: ContainerId, port: &str, value: PortValue) -> Result<()> {
        let ports = self
            .containers
            .ports(container)
            .ok_or_else(|| RecallError::Failed(format!("unknown container {container}")))?;
        ports.get(port)?.safe_write(value)?;
        Ok(())
    }

    pub fn read_port(&self, container: ContainerId, port: &str) -> Result<PortValue> {
        let ports = self
            .containers
            .ports(container)
            .ok_or_else(|| RecallError::Failed(format!("unknown container {container}")))?;
        Ok(ports.get(port)?.safe_read())
    }

    /// Every signal must be tagged with a live context listing its recycling.
    pub fn check_isolation(&self) -> Vec<IsolationViolation> {
        let graph = self.graph();
        let mut violations = Vec::new();
        for audio in graph.audios() {
            for r in graph.recyclings_of(audio.id()) {
                let Some(recycling) = graph.recycling(r) else {
                    continue;
                };
                for (signal, tag) in recycling.signal_tags() {
                    match tag {
                        None => violations.push(IsolationViolation::Untagged { signal, recycling: r }),
                        Some(context) => match self.contexts.get(context) {
                            None => violations.push(IsolationViolation::UnknownContext { signal, context }),
                            Some(ctx) if !ctx.contains(r) => {
                                violations.push(IsolationViolation::NotListed {
                                    signal,
                                    recycling: r,
                                    context,
                                })
                            }
                            Some(_) => {}
                        },
                    }
                }
            }
        }
        violations
    }

    /// Exclusive access to the writable graph, for tests and tools.
    pub fn lock_graph(&self) -> MutexGuard<'_, AudioGraph> {
        self.graph.lock()
    }
}

impl core::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("contexts", &self.contexts.len())
            .field("recall_ids", &self.recall_ids.len())
            .field("recalls", &self.recalls.len())
            .field("tic", &self.tic_count())
            .finish()
    }
}

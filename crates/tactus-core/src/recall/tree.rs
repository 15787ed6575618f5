//! Recall tree: templates, bound instances and their lazily mapped children.
//!
//! Nodes live behind their own mutex in a concurrent map. A worker only locks
//! nodes of the unit it runs, so units never contend. Map guards are always
//! released before a node is locked.

use super::{MapChild, Recall, RecallEvent, RecallFlags, RecallScope, RecallState, RecallTarget, UnitTarget};
use crate::error::{RecallError, RecallResult};
use crate::port::PortSet;
use crate::recall_id::RecallIdEntry;
use crate::{AbilityFlags, ContainerId, ContextId, RecallId, RecallKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

pub type SharedNode = Arc<Mutex<RecallNode>>;

#[derive(Debug)]
pub struct RecallNode {
    pub(crate) key: RecallKey,
    pub(crate) name: String,
    pub(crate) target: RecallTarget,
    /// Template at the top of this node's family.
    pub(crate) origin: RecallKey,
    pub(crate) state: RecallState,
    pub(crate) flags: RecallFlags,
    pub(crate) ability: AbilityFlags,
    pub(crate) map_child: Option<MapChild>,
    pub(crate) parent: Option<RecallKey>,
    pub(crate) template: Option<RecallKey>,
    pub(crate) container: Option<ContainerId>,
    pub(crate) recall_id: Option<RecallIdEntry>,
    pub(crate) children: SmallVec<[(RecallTarget, RecallKey); 4]>,
    pub(crate) ports: Arc<PortSet>,
    pub(crate) behavior: Box<dyn Recall>,
}

impl RecallNode {
    pub fn key(&self) -> RecallKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> RecallTarget {
        self.target
    }

    pub fn scope(&self) -> RecallScope {
        self.target.scope()
    }

    pub fn origin(&self) -> RecallKey {
        self.origin
    }

    pub fn state(&self) -> RecallState {
        self.state
    }

    pub fn flags(&self) -> RecallFlags {
        self.flags
    }

    pub fn ability(&self) -> AbilityFlags {
        self.ability
    }

    pub fn map_child(&self) -> Option<MapChild> {
        self.map_child
    }

    pub fn parent(&self) -> Option<RecallKey> {
        self.parent
    }

    /// Template this instance was duplicated from.
    pub fn template(&self) -> Option<RecallKey> {
        self.template
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    pub fn recall_id(&self) -> Option<RecallIdEntry> {
        self.recall_id
    }

    pub fn children(&self) -> impl Iterator<Item = RecallKey> + '_ {
        self.children.iter().map(|(_, key)| *key)
    }

    pub fn ports(&self) -> &Arc<PortSet> {
        &self.ports
    }

    pub fn is_template(&self) -> bool {
        self.state == RecallState::Template
    }

    /// Bound instance at the top of its unit, as opposed to a mapped child.
    pub fn is_root_instance(&self) -> bool {
        self.template.is_some() && self.parent.is_none()
    }
}

/// Root instance as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    pub unit: UnitTarget,
    pub run_order: u32,
    pub key: RecallKey,
}

/// What one [`RecallTree::reap`] pass released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub freed: Vec<RecallKey>,
    /// Recall ids whose bound instance was freed.
    pub released: Vec<RecallIdEntry>,
}

#[derive(Debug, Default)]
pub struct RecallTree {
    nodes: DashMap<RecallKey, SharedNode>,
    roots: DashMap<ContextId, Vec<RootEntry>>,
    by_id: DashMap<RecallId, RecallKey>,
}

impl RecallTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: RecallKey) -> Option<SharedNode> {
        self.nodes.get(&key).map(|n| Arc::clone(n.value()))
    }

    pub fn state(&self, key: RecallKey) -> Option<RecallState> {
        self.node(key).map(|n| n.lock().state)
    }

    pub fn contains(&self, key: RecallKey) -> bool {
        self.nodes.contains_key(&key)
    }

    fn all(&self) -> Vec<SharedNode> {
        self.nodes.iter().map(|n| Arc::clone(n.value())).collect()
    }

    /// Attach a template to an audio or a channel.
    pub fn insert_template(
        &self,
        behavior: Box<dyn Recall>,
        target: RecallTarget,
        ports: Arc<PortSet>,
        flags: RecallFlags,
        container: Option<ContainerId>,
    ) -> RecallResult<RecallKey> {
        if !matches!(target.scope(), RecallScope::Audio | RecallScope::Channel) {
            return Err(RecallError::Failed(format!(
                "template '{}' must attach to an audio or a channel",
                behavior.name()
            )));
        }
        let key = RecallKey::next();
        let node = RecallNode {
            key,
            name: behavior.name().to_string(),
            target,
            origin: key,
            state: RecallState::Template,
            flags,
            ability: behavior.ability(),
            map_child: behavior.map_child(),
            parent: None,
            template: None,
            container,
            recall_id: None,
            children: SmallVec::new(),
            ports,
            behavior,
        };
        self.nodes.insert(key, Arc::new(Mutex::new(node)));
        Ok(key)
    }

    /// Duplicate `template` into a running instance bound to `entry`.
    pub fn instantiate(&self, template: RecallKey, entry: RecallIdEntry) -> RecallResult<RecallKey> {
        let source = self.node(template).ok_or(RecallError::UnknownRecall(template))?;
        let key = RecallKey::next();
        let (node, unit) = {
            let t = source.lock();
            if !t.is_template() {
                return Err(RecallError::InvalidTransition {
                    from: t.state,
                    event: RecallEvent::BeginInit,
                });
            }
            let unit = match t.target {
                RecallTarget::Audio(audio) => UnitTarget::Audio(audio),
                RecallTarget::Channel { channel, .. } => UnitTarget::Channel(channel),
                _ => return Err(RecallError::UnknownRecall(template)),
            };
            let node = RecallNode {
                key,
                name: t.name.clone(),
                target: t.target,
                origin: t.origin,
                state: RecallState::Instantiated,
                flags: t.flags,
                ability: t.ability,
                map_child: t.map_child,
                parent: None,
                template: Some(template),
                container: t.container,
                recall_id: Some(entry),
                children: SmallVec::new(),
                ports: Arc::clone(&t.ports),
                behavior: dyn_clone::clone_box(&*t.behavior),
            };
            (node, unit)
        };

        self.nodes.insert(key, Arc::new(Mutex::new(node)));
        {
            let mut roots = self.roots.entry(entry.context).or_default();
            roots.push(RootEntry {
                unit,
                run_order: entry.run_order,
                key,
            });
            roots.sort_by_key(|r| r.run_order);
        }
        self.by_id.insert(entry.id, key);
        tracing::debug!(template = %template, instance = %key, recall_id = %entry.id, "instantiated recall");
        Ok(key)
    }

    /// Create a mapped child under `parent`, which the caller holds locked.
    pub(crate) fn attach_child(
        &self,
        parent: &mut RecallNode,
        target: RecallTarget,
        behavior: Box<dyn Recall>,
    ) -> RecallKey {
        let key = RecallKey::next();
        let node = RecallNode {
            key,
            name: behavior.name().to_string(),
            target,
            origin: parent.origin,
            state: RecallState::Instantiated,
            flags: RecallFlags {
                persistent: false,
                propagate_done: parent.flags.propagate_done,
            },
            ability: behavior.ability(),
            map_child: behavior.map_child(),
            parent: Some(parent.key),
            template: None,
            container: parent.container,
            recall_id: parent.recall_id,
            children: SmallVec::new(),
            ports: Arc::clone(&parent.ports),
            behavior,
        };
        self.nodes.insert(key, Arc::new(Mutex::new(node)));
        parent.children.push((target, key));
        key
    }

    /// Root instances bound to `context`, in run order.
    pub fn roots_for(&self, context: ContextId) -> Vec<RootEntry> {
        self.roots
            .get(&context)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn roots_for_unit(&self, context: ContextId, unit: UnitTarget) -> Vec<RecallKey> {
        self.roots
            .get(&context)
            .map(|r| r.iter().filter(|e| e.unit == unit).map(|e| e.key).collect())
            .unwrap_or_default()
    }

    /// Distinct units of `context`, ordered by their first instance's run order.
    pub fn units(&self, context: ContextId) -> Vec<UnitTarget> {
        let mut units = Vec::new();
        for entry in self.roots_for(context) {
            if !units.contains(&entry.unit) {
                units.push(entry.unit);
            }
        }
        units
    }

    /// Contexts with at least one bound instance.
    pub fn bound_contexts(&self) -> Vec<ContextId> {
        let mut contexts: Vec<ContextId> = self.roots.iter().map(|r| *r.key()).collect();
        contexts.sort();
        contexts
    }

    pub fn instance_of(&self, recall_id: RecallId) -> Option<RecallKey> {
        self.by_id.get(&recall_id).map(|k| *k)
    }

    pub fn children(&self, key: RecallKey) -> Vec<RecallKey> {
        self.node(key)
            .map(|n| n.lock().children().collect())
            .unwrap_or_default()
    }

    /// Child of `parent` mapped for `target`.
    pub fn find_child(&self, parent: RecallKey, target: &RecallTarget) -> Option<RecallKey> {
        let node = self.node(parent)?;
        let guard = node.lock();
        guard
            .children
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, key)| *key)
            .find(|key| self.state(*key).is_some_and(RecallState::is_runnable))
    }

    pub fn find_by_name(&self, name: &str) -> Vec<RecallKey> {
        self.collect(|n| n.name == name)
    }

    pub fn templates(&self) -> Vec<RecallKey> {
        self.collect(RecallNode::is_template)
    }

    /// Every instance, root or mapped, running under `context`.
    pub fn instances_in(&self, context: ContextId) -> Vec<RecallKey> {
        self.collect(|n| n.recall_id.is_some_and(|e| e.context == context))
    }

    /// Live nodes of one family at one scope level.
    pub fn count(&self, origin: RecallKey, scope: RecallScope) -> usize {
        self.collect(|n| {
            n.origin == origin && n.scope() == scope && !n.is_template() && n.state != RecallState::Freed
        })
        .len()
    }

    fn collect(&self, mut pred: impl FnMut(&RecallNode) -> bool) -> Vec<RecallKey> {
        let mut keys: Vec<RecallKey> = self
            .all()
            .into_iter()
            .filter_map(|n| {
                let n = n.lock();
                pred(&n).then_some(n.key)
            })
            .collect();
        keys.sort();
        keys
    }

    /// Whether every instance bound to `context` is done.
    pub fn is_done(&self, context: ContextId) -> bool {
        let roots = self.roots_for(context);
        !roots.is_empty()
            && roots
                .iter()
                .all(|r| self.state(r.key) == Some(RecallState::Done))
    }

    /// Complete a recall, children first. Ignored for templates, persistent
    /// recalls and recalls that are not running.
    pub fn done(&self, key: RecallKey) -> bool {
        let Some(node) = self.node(key) else {
            return false;
        };
        let children: Vec<RecallKey> = {
            let n = node.lock();
            if n.flags.persistent || !n.state.is_runnable() {
                return false;
            }
            n.children().collect()
        };
        for child in children {
            self.done(child);
        }

        let mut n = node.lock();
        if !n.state.is_runnable() {
            return false;
        }
        match n.state.transition(RecallEvent::Complete) {
            Ok(next) => {
                n.state = next;
                n.behavior.on_done();
                tracing::debug!(recall = %key, name = %n.name, "recall done");
                true
            }
            Err(_) => false,
        }
    }

    /// Move a recall and all its children to `Removing`, children first.
    pub fn cancel(&self, key: RecallKey) -> RecallResult {
        let node = self.node(key).ok_or(RecallError::UnknownRecall(key))?;
        let children: Vec<RecallKey> = node.lock().children().collect();
        for child in children {
            if self.contains(child) {
                self.cancel(child)?;
            }
        }

        let mut n = node.lock();
        if n.state == RecallState::Removing {
            return Ok(());
        }
        n.state = n.state.transition(RecallEvent::Cancel)?;
        n.behavior.on_cancel();
        tracing::debug!(recall = %key, name = %n.name, "recall cancelled");
        Ok(())
    }

    /// Explicitly remove a done recall.
    pub fn remove(&self, key: RecallKey) -> RecallResult {
        let node = self.node(key).ok_or(RecallError::UnknownRecall(key))?;
        let mut n = node.lock();
        n.state = n.state.transition(RecallEvent::Remove)?;
        Ok(())
    }

    /// Bring a done recall back to running.
    pub fn resume(&self, key: RecallKey) -> RecallResult {
        let node = self.node(key).ok_or(RecallError::UnknownRecall(key))?;
        let mut n = node.lock();
        n.state = n.state.transition(RecallEvent::Resume)?;
        Ok(())
    }

    /// Clear the persistent flag and complete the recall.
    pub fn stop_persistent(&self, key: RecallKey) -> bool {
        if let Some(node) = self.node(key) {
            node.lock().flags.persistent = false;
        }
        self.done(key)
    }

    /// Free every `Removing` node and every done mapped child.
    ///
    /// Runs between tics only. A parent flagged `propagate_done` completes
    /// once its last child is gone, which may free it in the same pass.
    pub fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();
        loop {
            let doomed: Vec<SharedNode> = self
                .all()
                .into_iter()
                .filter(|node| {
                    let n = node.lock();
                    n.state == RecallState::Removing
                        || (n.state == RecallState::Done && n.parent.is_some())
                })
                .collect();
            if doomed.is_empty() {
                break;
            }

            let mut propagate = Vec::new();
            for node in doomed {
                let (key, parent, root) = {
                    let mut n = node.lock();
                    if n.state == RecallState::Done {
                        n.state = RecallState::Removing;
                    }
                    match n.state.transition(RecallEvent::Free) {
                        Ok(next) => n.state = next,
                        Err(_) => continue,
                    }
                    let root = n.is_root_instance().then_some(n.recall_id).flatten();
                    (n.key, n.parent, root)
                };
                self.nodes.remove(&key);
                report.freed.push(key);

                if let Some(parent) = parent.and_then(|p| self.node(p)) {
                    let mut p = parent.lock();
                    p.children.retain(|(_, k)| *k != key);
                    if p.flags.propagate_done && p.children.is_empty() && p.state.is_runnable() {
                        propagate.push(p.key);
                    }
                }
                if let Some(entry) = root {
                    if let Some(mut roots) = self.roots.get_mut(&entry.context) {
                        roots.retain(|r| r.key != key);
                    }
                    self.roots.remove_if(&entry.context, |_, roots| roots.is_empty());
                    self.by_id.remove(&entry.id);
                    report.released.push(entry);
                }
            }
            for key in propagate {
                self.done(key);
            }
        }
        if !report.freed.is_empty() {
            tracing::debug!(freed = report.freed.len(), released = report.released.len(), "reaped recalls");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioId, ChannelId, SoundScope};

    #[derive(Clone)]
    struct Marker;

    impl Recall for Marker {
        fn name(&self) -> &str {
            "marker"
        }

        fn new_child(&self, _target: &RecallTarget) -> Option<Box<dyn Recall>> {
            Some(Box::new(Marker))
        }
    }

    fn entry(context: ContextId, template: RecallKey, run_order: u32) -> RecallIdEntry {
        RecallIdEntry {
            id: RecallId::next(),
            context,
            template,
            scope: SoundScope::Playback,
            run_order,
        }
    }

    fn template(tree: &RecallTree, flags: RecallFlags) -> RecallKey {
        tree.insert_template(
            Box::new(Marker),
            RecallTarget::channel(ChannelId::next()),
            PortSet::empty(),
            flags,
            None,
        )
        .unwrap()
    }

    fn with_child(tree: &RecallTree, parent: RecallKey) -> RecallKey {
        let node = tree.node(parent).unwrap();
        let mut guard = node.lock();
        let behavior = guard.behavior.new_child(&RecallTarget::Audio(AudioId::next())).unwrap();
        tree.attach_child(&mut guard, RecallTarget::Audio(AudioId::next()), behavior)
    }

    fn force_state(tree: &RecallTree, key: RecallKey, state: RecallState) {
        tree.node(key).unwrap().lock().state = state;
    }

    #[test]
    fn test_templates_only_on_audio_or_channel() {
        let tree = RecallTree::new();
        let result = tree.insert_template(
            Box::new(Marker),
            RecallTarget::Recycling {
                source: crate::RecyclingId::next(),
                destination: None,
            },
            PortSet::empty(),
            RecallFlags::default(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_instantiate_orders_roots() {
        let tree = RecallTree::new();
        let context = ContextId::next();
        let (a, b) = (template(&tree, RecallFlags::default()), template(&tree, RecallFlags::default()));

        let second = tree.instantiate(b, entry(context, b, 1)).unwrap();
        let first = tree.instantiate(a, entry(context, a, 0)).unwrap();
        let keys: Vec<_> = tree.roots_for(context).iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![first, second]);
        assert_eq!(tree.state(first), Some(RecallState::Instantiated));
        assert_eq!(tree.units(context).len(), 2);

        // instances are never templates for further duplication
        assert!(tree.instantiate(first, entry(context, first, 2)).is_err());
    }

    #[test]
    fn test_done_children_first_and_templates_ignored() {
        let tree = RecallTree::new();
        let t = template(&tree, RecallFlags::default());
        assert!(!tree.done(t));

        let instance = tree.instantiate(t, entry(ContextId::next(), t, 0)).unwrap();
        force_state(&tree, instance, RecallState::Running);
        let child = with_child(&tree, instance);
        force_state(&tree, child, RecallState::Running);

        assert!(tree.done(instance));
        assert_eq!(tree.state(child), Some(RecallState::Done));
        assert_eq!(tree.state(instance), Some(RecallState::Done));

        tree.resume(instance).unwrap();
        assert_eq!(tree.state(instance), Some(RecallState::Running));
    }

    #[test]
    fn test_persistent_ignores_done() {
        let tree = RecallTree::new();
        let t = template(&tree, RecallFlags::persistent());
        let instance = tree.instantiate(t, entry(ContextId::next(), t, 0)).unwrap();
        force_state(&tree, instance, RecallState::Running);

        assert!(!tree.done(instance));
        assert!(tree.stop_persistent(instance));
        assert_eq!(tree.state(instance), Some(RecallState::Done));
    }

    #[test]
    fn test_cancel_is_recursive() {
        let tree = RecallTree::new();
        let t = template(&tree, RecallFlags::default());
        let instance = tree.instantiate(t, entry(ContextId::next(), t, 0)).unwrap();
        let child = with_child(&tree, instance);
        let grandchild = with_child(&tree, child);

        tree.cancel(instance).unwrap();
        for key in [instance, child, grandchild] {
            assert_eq!(tree.state(key), Some(RecallState::Removing));
        }
        tree.cancel(instance).unwrap();
    }

    #[test]
    fn test_reap_releases_recall_id() {
        let tree = RecallTree::new();
        let context = ContextId::next();
        let t = template(&tree, RecallFlags::default());
        let e = entry(context, t, 0);
        let instance = tree.instantiate(t, e).unwrap();
        with_child(&tree, instance);

        tree.cancel(instance).unwrap();
        let report = tree.reap();
        assert_eq!(report.freed.len(), 2);
        assert_eq!(report.released, vec![e]);
        assert!(tree.roots_for(context).is_empty());
        assert_eq!(tree.instance_of(e.id), None);
        assert!(tree.contains(t));
    }

    #[test]
    fn test_reap_propagates_done() {
        let tree = RecallTree::new();
        let t = template(&tree, RecallFlags::propagate_done());
        let instance = tree.instantiate(t, entry(ContextId::next(), t, 0)).unwrap();
        force_state(&tree, instance, RecallState::Running);
        let child = with_child(&tree, instance);
        let grandchild = with_child(&tree, child);
        force_state(&tree, child, RecallState::Running);
        force_state(&tree, grandchild, RecallState::Done);

        let report = tree.reap();
        assert!(report.freed.contains(&grandchild));
        assert!(report.freed.contains(&child));
        // root instances stay done until removed explicitly
        assert_eq!(tree.state(instance), Some(RecallState::Done));
        assert!(report.released.is_empty());

        tree.remove(instance).unwrap();
        assert_eq!(tree.reap().released.len(), 1);
    }

    #[test]
    fn test_count_by_scope() {
        let tree = RecallTree::new();
        let t = template(&tree, RecallFlags::default());
        let instance = tree.instantiate(t, entry(ContextId::next(), t, 0)).unwrap();
        with_child(&tree, instance);
        with_child(&tree, instance);
        assert_eq!(tree.count(t, RecallScope::Audio), 2);
        assert_eq!(tree.count(t, RecallScope::Channel), 1);
        assert_eq!(tree.find_by_name("marker").len(), 4);
    }
}

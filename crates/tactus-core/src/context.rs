//! Recycling contexts and the context tree.
//!
//! A context lists the recyclings taking part in one scope of execution. The
//! tree is published copy-on-write: the tic reads a snapshot without locking,
//! structural edits serialize on a writer lock and swap in a new map.

use crate::error::{BusyReason, GraphError};
use crate::{ContextId, RecyclingId, SoundScope};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type ContextMap = HashMap<ContextId, Arc<RecyclingContext>>;

/// One scope node: ordered recyclings plus its place in the tree.
#[derive(Debug, Clone)]
pub struct RecyclingContext {
    id: ContextId,
    recyclings: Vec<RecyclingId>,
    parent: Option<ContextId>,
    children: SmallVec<[ContextId; 4]>,
    depth: usize,
    tag: SoundScope,
}

impl RecyclingContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn recyclings(&self) -> &[RecyclingId] {
        &self.recyclings
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Distance from the toplevel context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn tag(&self) -> SoundScope {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.recyclings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recyclings.is_empty()
    }

    pub fn contains(&self, recycling: RecyclingId) -> bool {
        self.recyclings.contains(&recycling)
    }

    /// Position of `recycling` in this context.
    pub fn find(&self, recycling: RecyclingId) -> Option<usize> {
        self.recyclings.iter().position(|r| *r == recycling)
    }

    /// Mark this thread as working inside the context. Debug builds assert
    /// that contexts are entered in increasing depth order.
    pub fn enter(&self) -> DepthToken {
        DepthToken::acquire(self.depth)
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD_DEPTH: core::cell::Cell<Option<usize>> = const { core::cell::Cell::new(None) };
}

/// Guard returned by [`RecyclingContext::enter`].
#[must_use]
pub struct DepthToken {
    #[cfg(debug_assertions)]
    previous: Option<usize>,
}

impl DepthToken {
    #[cfg(debug_assertions)]
    fn acquire(depth: usize) -> Self {
        let previous = HELD_DEPTH.with(|held| held.replace(Some(depth)));
        debug_assert!(
            previous.map_or(true, |held| depth >= held),
            "context entered at depth {depth} while holding depth {previous:?}"
        );
        Self { previous }
    }

    #[cfg(not(debug_assertions))]
    fn acquire(_depth: usize) -> Self {
        Self {}
    }
}

impl Drop for DepthToken {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD_DEPTH.with(|held| held.set(self.previous));
    }
}

/// All live recycling contexts.
pub struct ContextTree {
    nodes: ArcSwap<ContextMap>,
    writer: Mutex<()>,
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTree {
    pub fn new() -> Self {
        Self {
            nodes: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut ContextMap) -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        let _writer = self.writer.lock();
        let mut map = self.nodes.load().as_ref().clone();
        let result = f(&mut map)?;
        self.nodes.store(Arc::new(map));
        Ok(result)
    }

    /// Lock-free snapshot of the whole tree.
    pub fn snapshot(&self) -> Arc<HashMap<ContextId, Arc<RecyclingContext>>> {
        self.nodes.load_full()
    }

    pub fn get(&self, id: ContextId) -> Option<Arc<RecyclingContext>> {
        self.nodes.load().get(&id).cloned()
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.nodes.load().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }

    /// Create a toplevel context.
    pub fn create(&self, recyclings: Vec<RecyclingId>, tag: SoundScope) -> ContextId {
        let context = RecyclingContext {
            id: ContextId::next(),
            recyclings,
            parent: None,
            children: SmallVec::new(),
            depth: 0,
            tag,
        };
        let id = context.id;
        // Inserting a fresh root cannot fail.
        let _ = self.mutate(|map| {
            map.insert(id, Arc::new(context));
            Ok(())
        });
        tracing::debug!(context = %id, "created toplevel context");
        id
    }

    /// Create a context nested under `parent`.
    pub fn create_child(
        &self,
        parent: ContextId,
        recyclings: Vec<RecyclingId>,
        tag: SoundScope,
    ) -> Result<ContextId, GraphError> {
        let id = ContextId::next();
        self.mutate(|map| {
            let parent_ctx = map
                .get(&parent)
                .ok_or(GraphError::UnknownContext(parent))?;
            let depth = parent_ctx.depth + 1;
            let mut updated = RecyclingContext::clone(parent_ctx);
            updated.children.push(id);
            map.insert(parent, Arc::new(updated));
            map.insert(
                id,
                Arc::new(RecyclingContext {
                    id,
                    recyclings,
                    parent: Some(parent),
                    children: SmallVec::new(),
                    depth,
                    tag,
                }),
            );
            Ok(())
        })?;
        tracing::debug!(context = %id, parent = %parent, "created child context");
        Ok(id)
    }

    /// Reparent `child` under `parent`.
    pub fn add_child(&self, parent: ContextId, child: ContextId) -> Result<(), GraphError> {
        self.mutate(|map| {
            if !map.contains_key(&child) {
                return Err(GraphError::UnknownContext(child));
            }
            if parent == child || ancestors(map, parent)?.contains(&child) {
                tracing::error!(parent = %parent, child = %child, "reparenting would close a cycle");
                return Err(GraphError::CycleDetected(child));
            }
            detach(map, child);
            update(map, parent, |ctx| ctx.children.push(child))?;
            update(map, child, |ctx| ctx.parent = Some(parent))?;
            refresh_depths(map, child)
        })
    }

    /// Detach `child` from `parent`; it becomes a toplevel context.
    pub fn remove_child(&self, parent: ContextId, child: ContextId) -> Result<(), GraphError> {
        self.mutate(|map| {
            let is_child = map
                .get(&parent)
                .ok_or(GraphError::UnknownContext(parent))?
                .children
                .contains(&child);
            if !is_child {
                return Err(GraphError::UnknownContext(child));
            }
            detach(map, child);
            refresh_depths(map, child)
        })
    }

    /// Remove a context. Refused while it still has children.
    pub fn destroy(&self, id: ContextId) -> Result<(), GraphError> {
        self.mutate(|map| {
            let ctx = map.get(&id).ok_or(GraphError::UnknownContext(id))?;
            if ctx.has_children() {
                return Err(GraphError::Busy(BusyReason::LiveChildren));
            }
            detach(map, id);
            map.remove(&id);
            Ok(())
        })?;
        tracing::debug!(context = %id, "destroyed context");
        Ok(())
    }

    pub fn toplevel(&self, id: ContextId) -> Result<ContextId, GraphError> {
        let map = self.nodes.load();
        if !map.contains_key(&id) {
            return Err(GraphError::UnknownContext(id));
        }
        Ok(ancestors(&map, id)?.last().copied().unwrap_or(id))
    }

    /// Position of `recycling` in context `id`.
    pub fn find(&self, id: ContextId, recycling: RecyclingId) -> Option<usize> {
        self.get(id)?.find(recycling)
    }

    /// Direct child of `id` listing `recycling`.
    pub fn find_child(&self, id: ContextId, recycling: RecyclingId) -> Option<ContextId> {
        let map = self.nodes.load();
        map.get(&id)?
            .children
            .iter()
            .find(|c| map.get(c).is_some_and(|ctx| ctx.contains(recycling)))
            .copied()
    }

    /// Nearest ancestor of `id` listing `recycling`.
    pub fn find_parent(&self, id: ContextId, recycling: RecyclingId) -> Option<ContextId> {
        let map = self.nodes.load();
        ancestors(&map, id)
            .ok()?
            .into_iter()
            .find(|a| map.get(a).is_some_and(|ctx| ctx.contains(recycling)))
    }

    /// Put `recycling` at `position`, replacing what was there.
    pub fn replace(
        &self,
        id: ContextId,
        recycling: RecyclingId,
        position: usize,
    ) -> Result<(), GraphError> {
        self.mutate(|map| {
            let len = map.get(&id).ok_or(GraphError::UnknownContext(id))?.len();
            if position >= len {
                return Err(GraphError::CountMismatch {
                    expected: len,
                    found: position,
                });
            }
            update(map, id, |ctx| ctx.recyclings[position] = recycling)
        })
    }

    /// Swap the run `old_first..=old_last` for `new`, keeping every other
    /// recycling at its position relative to its neighbours. `None` appends.
    pub fn reset_recycling(
        &self,
        id: ContextId,
        old: Option<(RecyclingId, RecyclingId)>,
        new: &[RecyclingId],
    ) -> Result<(), GraphError> {
        self.mutate(|map| {
            let ctx = map.get(&id).ok_or(GraphError::UnknownContext(id))?;
            let range = match old {
                None => ctx.len()..ctx.len(),
                Some((first, last)) => {
                    let start = ctx
                        .find(first)
                        .ok_or(GraphError::RecyclingNotInContext(first, id))?;
                    let end = ctx
                        .find(last)
                        .ok_or(GraphError::RecyclingNotInContext(last, id))?;
                    if end < start {
                        return Err(GraphError::RecyclingNotInContext(last, id));
                    }
                    start..end + 1
                }
            };
            update(map, id, |ctx| {
                ctx.recyclings.splice(range, new.iter().copied());
            })
        })
    }

    /// Drop `removed` from the context, keeping the others in order.
    pub fn remove_recyclings(
        &self,
        id: ContextId,
        removed: &[RecyclingId],
    ) -> Result<(), GraphError> {
        self.mutate(|map| {
            update(map, id, |ctx| ctx.recyclings.retain(|r| !removed.contains(r)))
        })
    }

    /// Whether a signal tagged `signal_context` may be touched while running
    /// under `from`: its own context, or a direct child feeding it.
    pub fn is_visible(&self, from: ContextId, signal_context: ContextId) -> bool {
        if from == signal_context {
            return true;
        }
        self.nodes
            .load()
            .get(&signal_context)
            .is_some_and(|ctx| ctx.parent == Some(from))
    }

    /// `id` and its descendants, children before parents.
    pub fn descendants_postorder(&self, id: ContextId) -> Result<Vec<ContextId>, GraphError> {
        let map = self.nodes.load();
        let mut order = self.resolve_in(&map, &[id])?;
        order.reverse();
        Ok(order)
    }

    /// Topologically order everything reachable from `roots`, parents first.
    pub fn resolve_contexts(&self, roots: &[ContextId]) -> Result<Vec<ContextId>, GraphError> {
        let map = self.nodes.load();
        self.resolve_in(&map, roots)
    }

    /// Same as [`resolve_contexts`](Self::resolve_contexts), grouped by depth.
    pub fn resolve_levels(&self, roots: &[ContextId]) -> Result<Vec<Vec<ContextId>>, GraphError> {
        let map = self.nodes.load();
        let order = self.resolve_in(&map, roots)?;
        let mut levels: Vec<Vec<ContextId>> = Vec::new();
        for id in order {
            let depth = depth_of(&map, id)?;
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(id);
        }
        levels.retain(|level| !level.is_empty());
        Ok(levels)
    }

    fn resolve_in(&self, map: &ContextMap, roots: &[ContextId]) -> Result<Vec<ContextId>, GraphError> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        for &root in roots {
            if !map.contains_key(&root) {
                return Err(GraphError::UnknownContext(root));
            }
            let mut on_path = HashSet::new();
            visit(map, root, &mut visited, &mut on_path, &mut order)?;
        }

        let mut keyed = Vec::with_capacity(order.len());
        for id in order {
            keyed.push((depth_of(map, id)?, id));
        }
        keyed.sort_by_key(|(depth, _)| *depth);
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }

    #[cfg(test)]
    fn corrupt_parent(&self, id: ContextId, parent: ContextId) {
        let _ = self.mutate(|map| {
            update(map, id, |ctx| ctx.parent = Some(parent))?;
            update(map, parent, |ctx| ctx.children.push(id))
        });
    }
}

fn visit(
    map: &ContextMap,
    id: ContextId,
    visited: &mut HashSet<ContextId>,
    on_path: &mut HashSet<ContextId>,
    order: &mut Vec<ContextId>,
) -> Result<(), GraphError> {
    if on_path.contains(&id) {
        tracing::error!(context = %id, "cycle in context tree");
        return Err(GraphError::CycleDetected(id));
    }
    if !visited.insert(id) {
        return Ok(());
    }
    order.push(id);
    on_path.insert(id);
    if let Some(ctx) = map.get(&id) {
        for &child in &ctx.children {
            visit(map, child, visited, on_path, order)?;
        }
    }
    on_path.remove(&id);
    Ok(())
}

/// Ancestors of `id`, nearest first.
fn ancestors(map: &ContextMap, id: ContextId) -> Result<Vec<ContextId>, GraphError> {
    let mut chain = Vec::new();
    let mut current = map.get(&id).and_then(|ctx| ctx.parent);
    while let Some(parent) = current {
        if parent == id || chain.contains(&parent) || chain.len() > map.len() {
            return Err(GraphError::CycleDetected(parent));
        }
        chain.push(parent);
        current = map.get(&parent).and_then(|ctx| ctx.parent);
    }
    Ok(chain)
}

fn depth_of(map: &ContextMap, id: ContextId) -> Result<usize, GraphError> {
    ancestors(map, id).map(|chain| chain.len())
}

fn update(
    map: &mut ContextMap,
    id: ContextId,
    f: impl FnOnce(&mut RecyclingContext),
) -> Result<(), GraphError> {
    let current = map.get(&id).ok_or(GraphError::UnknownContext(id))?;
    let mut next = RecyclingContext::clone(current);
    f(&mut next);
    map.insert(id, Arc::new(next));
    Ok(())
}

fn detach(map: &mut ContextMap, child: ContextId) {
    let Some(parent) = map.get(&child).and_then(|ctx| ctx.parent) else {
        return;
    };
    let _ = update(map, parent, |ctx| ctx.children.retain(|c| *c != child));
    let _ = update(map, child, |ctx| ctx.parent = None);
}

fn refresh_depths(map: &mut ContextMap, root: ContextId) -> Result<(), GraphError> {
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return Err(GraphError::CycleDetected(id));
        }
        let depth = depth_of(map, id)?;
        update(map, id, |ctx| ctx.depth = depth)?;
        if let Some(ctx) = map.get(&id) {
            stack.extend(ctx.children.iter().copied());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recs(n: usize) -> Vec<RecyclingId> {
        (0..n).map(|_| RecyclingId::next()).collect()
    }

    #[test]
    fn test_child_depth_and_toplevel() {
        let tree = ContextTree::new();
        let root = tree.create(recs(2), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        let grandchild = tree.create_child(child, recs(1), SoundScope::Playback).unwrap();

        assert_eq!(tree.get(grandchild).unwrap().depth(), 2);
        assert_eq!(tree.toplevel(grandchild).unwrap(), root);
        assert_eq!(tree.get(root).unwrap().children(), &[child]);
    }

    #[test]
    fn test_destroy_refused_with_live_children() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();

        assert_eq!(
            tree.destroy(root),
            Err(GraphError::Busy(BusyReason::LiveChildren))
        );
        tree.destroy(child).unwrap();
        tree.destroy(root).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_find_child_and_parent() {
        let tree = ContextTree::new();
        let outer = recs(2);
        let inner = recs(2);
        let root = tree.create(outer.clone(), SoundScope::Sequencer);
        let child = tree.create_child(root, inner.clone(), SoundScope::Sequencer).unwrap();

        assert_eq!(tree.find(root, outer[1]), Some(1));
        assert_eq!(tree.find_child(root, inner[0]), Some(child));
        assert_eq!(tree.find_child(root, outer[0]), None);
        assert_eq!(tree.find_parent(child, outer[0]), Some(root));
        assert_eq!(tree.find_parent(child, inner[0]), None);
    }

    #[test]
    fn test_reset_recycling_preserves_positions() {
        let tree = ContextTree::new();
        let r = recs(4);
        let ctx = tree.create(r.clone(), SoundScope::Playback);
        let fresh = recs(2);

        tree.reset_recycling(ctx, Some((r[1], r[2])), &fresh).unwrap();
        let listed = tree.get(ctx).unwrap().recyclings().to_vec();
        assert_eq!(listed, vec![r[0], fresh[0], fresh[1], r[3]]);

        let tail = recs(1);
        tree.reset_recycling(ctx, None, &tail).unwrap();
        assert_eq!(tree.find(ctx, tail[0]), Some(4));
        assert_eq!(tree.find(ctx, r[0]), Some(0));
    }

    #[test]
    fn test_replace_out_of_range() {
        let tree = ContextTree::new();
        let ctx = tree.create(recs(1), SoundScope::Playback);
        assert!(tree.replace(ctx, RecyclingId::next(), 3).is_err());
    }

    #[test]
    fn test_add_child_rejects_cycle() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        assert_eq!(
            tree.add_child(child, root),
            Err(GraphError::CycleDetected(root))
        );
    }

    #[test]
    fn test_add_child_reparents_and_updates_depth() {
        let tree = ContextTree::new();
        let a = tree.create(recs(1), SoundScope::Playback);
        let b = tree.create(recs(1), SoundScope::Playback);
        let c = tree.create_child(b, recs(1), SoundScope::Playback).unwrap();

        tree.add_child(a, b).unwrap();
        assert_eq!(tree.get(c).unwrap().depth(), 2);

        tree.remove_child(a, b).unwrap();
        assert_eq!(tree.get(b).unwrap().depth(), 0);
        assert_eq!(tree.get(c).unwrap().depth(), 1);
    }

    #[test]
    fn test_resolve_parent_first() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let a = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        let b = tree.create_child(a, recs(1), SoundScope::Playback).unwrap();

        // Listing the deepest first must not change the order.
        let order = tree.resolve_contexts(&[b, root]).unwrap();
        assert_eq!(order, vec![root, a, b]);

        let levels = tree.resolve_levels(&[root]).unwrap();
        assert_eq!(levels, vec![vec![root], vec![a], vec![b]]);
    }

    #[test]
    fn test_resolve_detects_cycle() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        tree.corrupt_parent(root, child);

        assert!(matches!(
            tree.resolve_contexts(&[root]),
            Err(GraphError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_is_visible() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        let other = tree.create(recs(1), SoundScope::Playback);

        assert!(tree.is_visible(root, root));
        assert!(tree.is_visible(root, child));
        assert!(!tree.is_visible(child, root));
        assert!(!tree.is_visible(root, other));
    }

    #[test]
    fn test_descendants_postorder() {
        let tree = ContextTree::new();
        let root = tree.create(recs(1), SoundScope::Playback);
        let child = tree.create_child(root, recs(1), SoundScope::Playback).unwrap();
        assert_eq!(tree.descendants_postorder(root).unwrap(), vec![child, root]);
    }

    proptest::proptest! {
        #[test]
        fn test_levels_put_parents_first(parents in proptest::collection::vec(0usize..64, 1..24)) {
            let tree = ContextTree::new();
            let mut ids = vec![tree.create(recs(1), SoundScope::Playback)];
            for pick in parents {
                let parent = ids[pick % ids.len()];
                ids.push(tree.create_child(parent, recs(1), SoundScope::Playback).unwrap());
            }

            let order = tree.resolve_contexts(&[ids[0]]).unwrap();
            proptest::prop_assert_eq!(order.len(), ids.len());
            for id in &ids[1..] {
                let parent = tree.get(*id).unwrap().parent().unwrap();
                let at = |c| order.iter().position(|o| *o == c);
                proptest::prop_assert!(at(parent) < at(*id));
            }

            let levels = tree.resolve_levels(&[ids[0]]).unwrap();
            for (depth, level) in levels.iter().enumerate() {
                for id in level {
                    proptest::prop_assert_eq!(tree.get(*id).unwrap().depth(), depth);
                }
            }
        }
    }
}

//! Recall ids: bindings of a recall template to one recycling context.

use crate::{ContextId, RecallId, RecallKey, SoundScope};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Everything a recall id carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallIdEntry {
    pub id: RecallId,
    pub context: ContextId,
    /// Template the running instance was duplicated from.
    pub template: RecallKey,
    pub scope: SoundScope,
    /// Order among the ids of the same context, assigned at bind time.
    pub run_order: u32,
}

/// Registry of all live recall ids.
#[derive(Default)]
pub struct RecallIdRegistry {
    by_id: DashMap<RecallId, RecallIdEntry>,
    by_pair: DashMap<(RecallKey, ContextId), RecallId>,
    per_context: DashMap<ContextId, Vec<RecallId>>,
}

impl RecallIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or look up the id for `(template, context)`.
    ///
    /// The second element is `true` when a new id was created; binding the
    /// same pair again returns the existing id unchanged.
    pub fn bind(
        &self,
        template: RecallKey,
        context: ContextId,
        scope: SoundScope,
    ) -> (RecallIdEntry, bool) {
        let mut created = false;
        let id = *self
            .by_pair
            .entry((template, context))
            .or_insert_with(|| {
                created = true;
                let id = RecallId::next();
                let mut ids = self.per_context.entry(context).or_default();
                // after the highest order in use, so removals never cause a repeat
                let run_order = ids
                    .iter()
                    .filter_map(|i| self.by_id.get(i).map(|e| e.run_order))
                    .max()
                    .map_or(0, |highest| highest + 1);
                let entry = RecallIdEntry {
                    id,
                    context,
                    template,
                    scope,
                    run_order,
                };
                ids.push(id);
                self.by_id.insert(id, entry);
                id
            });

        let entry = self
            .by_id
            .get(&id)
            .map(|e| *e)
            .unwrap_or(RecallIdEntry {
                id,
                context,
                template,
                scope,
                run_order: 0,
            });
        (entry, created)
    }

    pub fn get(&self, id: RecallId) -> Option<RecallIdEntry> {
        self.by_id.get(&id).map(|e| *e)
    }

    pub fn find(&self, template: RecallKey, context: ContextId) -> Option<RecallId> {
        self.by_pair.get(&(template, context)).map(|id| *id)
    }

    /// Ids bound to `context`, in run order.
    pub fn in_context(&self, context: ContextId) -> Vec<RecallId> {
        self.per_context
            .get(&context)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Ids whose template is `template`, across every context.
    pub fn of_template(&self, template: RecallKey) -> Vec<RecallIdEntry> {
        self.by_id
            .iter()
            .filter(|e| e.template == template)
            .map(|e| *e)
            .collect()
    }

    pub fn count_in(&self, context: ContextId) -> usize {
        self.per_context.get(&context).map_or(0, |ids| ids.len())
    }

    pub fn set_run_order(&self, id: RecallId, run_order: u32) -> bool {
        match self.by_id.get_mut(&id) {
            Some(mut entry) => {
                entry.run_order = run_order;
                true
            }
            None => false,
        }
    }

    /// Forget an id. Must only happen between tics.
    pub fn remove(&self, id: RecallId) -> Option<RecallIdEntry> {
        let (_, entry) = self.by_id.remove(&id)?;
        self.by_pair.remove(&(entry.template, entry.context));
        let now_empty = match self.per_context.get_mut(&entry.context) {
            Some(mut ids) => {
                ids.retain(|i| *i != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.per_context.remove_if(&entry.context, |_, ids| ids.is_empty());
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

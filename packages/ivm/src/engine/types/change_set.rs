use super::entity::{CollectionName, Entity, EntityId};
use super::maps::{FastIndexMap, FastIndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// How a single id was touched inside one [`CollectionChanges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Full payload carrying its own id.
    Insert,
    /// Partial payload merged onto the prior state.
    Update,
    Delete,
    /// Deleted, then written again within the same batch.
    Replace,
}

/// Sets and deletes recorded against one collection.
///
/// An id present in both maps means "delete, then set": the set payload is
/// the complete new entity and nothing of the prior state survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionChanges {
    #[serde(default)]
    pub sets: FastIndexMap<EntityId, Entity>,
    #[serde(default)]
    pub deletes: FastIndexSet<EntityId>,
}

impl CollectionChanges {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }

    /// Every id touched by this batch, sets first, in arrival order.
    pub fn changed_ids(&self) -> FastIndexSet<EntityId> {
        self.sets
            .keys()
            .chain(self.deletes.iter())
            .cloned()
            .collect()
    }

    pub fn changed_count(&self) -> usize {
        self.changed_ids().len()
    }

    pub fn kind_of(&self, id: &str) -> Option<ChangeKind> {
        match (self.sets.get(id), self.deletes.contains(id)) {
            (Some(_), true) => Some(ChangeKind::Replace),
            (Some(e), false) if e.has_id() => Some(ChangeKind::Insert),
            (Some(_), false) => Some(ChangeKind::Update),
            (None, true) => Some(ChangeKind::Delete),
            (None, false) => None,
        }
    }

    /// True when every touched id is a full-payload insert.
    pub fn is_insert_only(&self) -> bool {
        !self.sets.is_empty()
            && self
                .changed_ids()
                .iter()
                .all(|id| self.kind_of(id) == Some(ChangeKind::Insert))
    }

    /// Record a write; a later partial write accumulates onto an earlier one.
    pub fn record_set(&mut self, id: EntityId, entity: Entity) {
        if let Some(existing) = self.sets.get_mut(&id) {
            existing.merge_partial(&entity);
        } else {
            self.sets.insert(id, entity);
        }
    }

    /// Record a write that replaces whatever was stored under `id`.
    pub fn record_replace(&mut self, id: EntityId, entity: Entity) {
        self.sets.insert(id, entity);
    }

    /// Record a removal; it cancels any earlier write for the same id.
    pub fn record_delete(&mut self, id: EntityId) {
        self.sets.shift_remove(&id);
        self.deletes.insert(id);
    }

    /// Fold a newer batch into this one.
    pub fn merge(&mut self, newer: CollectionChanges) {
        for id in newer.deletes {
            self.record_delete(id);
        }
        for (id, entity) in newer.sets {
            if self.deletes.contains(&id) {
                match self.sets.get_mut(&id) {
                    Some(existing) => existing.merge_partial(&entity),
                    None => {
                        self.sets.insert(id, entity);
                    }
                }
            } else {
                self.record_set(id, entity);
            }
        }
    }

    /// Resolve the state of `id` after this batch, given its committed state.
    pub fn entity_after(&self, id: &str, before: Option<&Entity>) -> Option<Entity> {
        match (self.sets.get(id), self.deletes.contains(id)) {
            (Some(set), true) => Some(set.clone()),
            (Some(set), false) => Some(Entity::merged(before, set)),
            (None, true) => None,
            (None, false) => before.cloned(),
        }
    }
}

/// Raw change set: per collection, entity sets and deletes.
///
/// Serializes as `{ "<collection>": { "sets": { "<id>": {..} }, "deletes": ["<id>"] } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<CollectionName, CollectionChanges>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(CollectionChanges::is_empty)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionChanges> {
        self.0.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> &mut CollectionChanges {
        self.0.entry(SmolStr::new(name)).or_default()
    }

    pub fn collections(&self) -> impl Iterator<Item = (&CollectionName, &CollectionChanges)> {
        self.0.iter().filter(|(_, changes)| !changes.is_empty())
    }

    pub fn record_set(&mut self, collection: &str, id: impl Into<EntityId>, entity: Entity) {
        self.collection_mut(collection).record_set(id.into(), entity);
    }

    pub fn record_delete(&mut self, collection: &str, id: impl Into<EntityId>) {
        self.collection_mut(collection).record_delete(id.into());
    }

    /// Fold a newer change set into this one, collection by collection.
    pub fn merge(&mut self, newer: ChangeSet) {
        for (name, changes) in newer.0 {
            self.0.entry(name).or_default().merge(changes);
        }
    }

    /// Builder: full entity insert, keyed by the payload's `id`.
    ///
    /// A payload without an `id` string is ignored.
    pub fn insert(mut self, collection: &str, entity: impl Into<Entity>) -> Self {
        let entity = entity.into();
        if let Some(id) = entity.id().map(SmolStr::new) {
            self.record_set(collection, id, entity);
        }
        self
    }

    /// Builder: partial update of `id`.
    pub fn update(mut self, collection: &str, id: &str, partial: Value) -> Self {
        self.record_set(collection, id, Entity::from(partial));
        self
    }

    /// Builder: delete `id`.
    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.record_delete(collection, id);
        self
    }

    pub fn total_changes(&self) -> usize {
        self.0
            .values()
            .map(|c| c.sets.len() + c.deletes.len())
            .sum()
    }
}

use super::{ApplyOptions, EntityStore};
use crate::engine::types::{ChangeSet, CollectionChanges, CollectionName, Entity, EntityId};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tracing::debug;

type Collection = BTreeMap<EntityId, Entity>;

/// In-memory entity store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<CollectionName, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entities directly, bypassing change tracking.
    pub fn seed<I>(&self, collection: &str, entities: I)
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut collections = self.collections.write();
        let target = collections.entry(SmolStr::new(collection)).or_default();
        for entity in entities {
            if let Some(id) = entity.id().map(SmolStr::new) {
                target.insert(id, entity);
            }
        }
    }

    pub fn entity_count(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    fn validate(name: &str, current: &Collection, changes: &CollectionChanges) -> Result<()> {
        for (id, entity) in &changes.sets {
            let replaced = changes.deletes.contains(id);
            if !replaced && current.contains_key(id) {
                continue;
            }
            match entity.id() {
                Some(own) if own == id.as_str() => {}
                Some(own) => bail!("{name}/{id}: payload id `{own}` does not match its key"),
                None => bail!("{name}/{id}: insert without an id"),
            }
        }
        Ok(())
    }
}

fn apply_collection(target: &mut Collection, changes: &CollectionChanges) {
    for id in &changes.deletes {
        target.remove(id);
    }
    for (id, entity) in &changes.sets {
        match target.get_mut(id) {
            Some(existing) => existing.merge_partial(entity),
            None => {
                target.insert(id.clone(), entity.clone());
            }
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_entity(&self, collection: &str, id: &str) -> Result<Option<Entity>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Entity>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_changes(&self, changes: &ChangeSet, options: ApplyOptions) -> Result<()> {
        let mut collections = self.collections.write();
        if options.validate {
            let empty = Collection::new();
            for (name, coll_changes) in changes.collections() {
                let current = collections.get(name).unwrap_or(&empty);
                Self::validate(name, current, coll_changes)?;
            }
        }
        for (name, coll_changes) in changes.collections() {
            let target = collections.entry(name.clone()).or_default();
            apply_collection(target, coll_changes);
            debug!(
                collection = %name,
                sets = coll_changes.sets.len(),
                deletes = coll_changes.deletes.len(),
                "applied changes"
            );
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.collections.write().clear();
        Ok(())
    }
}

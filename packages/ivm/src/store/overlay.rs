use super::{ApplyOptions, EntityStore};
use crate::engine::types::{ChangeSet, Entity, EntityId, FastSet};
use anyhow::{bail, Result};
use async_trait::async_trait;
use smol_str::SmolStr;

/// Read-only view of `base` with `pending` applied on top.
pub struct OverlayStore<'a> {
    base: &'a dyn EntityStore,
    pending: &'a ChangeSet,
}

impl<'a> OverlayStore<'a> {
    pub fn new(base: &'a dyn EntityStore, pending: &'a ChangeSet) -> Self {
        Self { base, pending }
    }
}

#[async_trait]
impl<'a> EntityStore for OverlayStore<'a> {
    async fn get_entity(&self, collection: &str, id: &str) -> Result<Option<Entity>> {
        let before = self.base.get_entity(collection, id).await?;
        Ok(match self.pending.collection(collection) {
            Some(changes) => changes.entity_after(id, before.as_ref()),
            None => before,
        })
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Entity>> {
        let rows = self.base.scan(collection).await?;
        let Some(changes) = self.pending.collection(collection) else {
            return Ok(rows);
        };

        let mut seen: FastSet<EntityId> = FastSet::default();
        let mut out = Vec::with_capacity(rows.len() + changes.sets.len());
        for row in rows {
            let Some(id) = row.id().map(SmolStr::new) else {
                out.push(row);
                continue;
            };
            if let Some(after) = changes.entity_after(&id, Some(&row)) {
                out.push(after);
            }
            seen.insert(id);
        }
        for id in changes.sets.keys() {
            if seen.contains(id) {
                continue;
            }
            if let Some(after) = changes.entity_after(id, None) {
                out.push(after);
            }
        }
        Ok(out)
    }

    async fn apply_changes(&self, _changes: &ChangeSet, _options: ApplyOptions) -> Result<()> {
        bail!("overlay store is read-only")
    }

    async fn clear(&self) -> Result<()> {
        bail!("overlay store is read-only")
    }
}

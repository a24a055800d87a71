//! What listeners receive, and how result trees turn into change sets.

use crate::engine::query::{Query, QueryId};
use crate::engine::types::{ChangeSet, CollectionName, Entity, EntityId, FastIndexMap, FastSet, ViewEntity};
use serde::Serialize;
use smol_str::SmolStr;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// First delivery to a listener: `changes` holds every visible entity.
    Initial,
    /// The result set was recomputed wholesale; re-read `results`.
    Snapshot,
    /// `changes` describes exactly what moved since the last delivery.
    Diff,
}

/// One delivery to a listener.
#[derive(Serialize, Debug, Clone)]
pub struct QueryUpdate {
    pub query_id: QueryId,
    pub kind: UpdateKind,
    /// Current results without synthetic includes.
    pub results: Vec<ViewEntity>,
    pub changes: ChangeSet,
    pub result_hash: String,
}

impl QueryUpdate {
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().filter_map(ViewEntity::id).collect()
    }
}

/// blake3 over the serialized rows, in order.
pub fn compute_result_hash(results: &[ViewEntity]) -> String {
    let mut hasher = blake3::Hasher::new();
    for row in results {
        if let Ok(bytes) = serde_json::to_vec(row) {
            hasher.update(&bytes);
        }
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

type Visible<'a> = FastIndexMap<(CollectionName, EntityId), &'a Entity>;

/// Every entity a listener can see: root rows plus rows of user includes,
/// keyed by collection and id.
fn collect_visible<'a>(query: &Query, rows: &'a [ViewEntity], out: &mut Visible<'a>) {
    for row in rows {
        if let Some(id) = row.id() {
            out.insert((query.collection_name.clone(), SmolStr::new(id)), &row.data);
        }
        for (key, include) in &query.include {
            if !key.is_user() {
                continue;
            }
            if let Some(sub) = row.subqueries.get(key) {
                collect_visible(&include.subquery, sub.rows(), out);
            }
        }
    }
}

/// Change set that loads `results` into an empty replica.
pub fn snapshot_changes(query: &Query, results: &[ViewEntity]) -> ChangeSet {
    let mut visible = Visible::default();
    collect_visible(query, results, &mut visible);
    let mut changes = ChangeSet::new();
    for ((collection, id), entity) in visible {
        changes.record_set(&collection, id, entity.clone());
    }
    changes
}

/// Change set that turns a replica of `old` into one of `new`.
pub fn diff_results(query: &Query, old: &[ViewEntity], new: &[ViewEntity]) -> ChangeSet {
    let mut before = Visible::default();
    let mut after = Visible::default();
    collect_visible(query, old, &mut before);
    collect_visible(query, new, &mut after);

    let mut changes = ChangeSet::new();
    for (key, entity) in &after {
        if before.get(key).map_or(true, |prev| prev != entity) {
            changes.record_set(&key.0, key.1.clone(), (*entity).clone());
        }
    }
    for (collection, id) in before.keys() {
        if !after.contains_key(&(collection.clone(), id.clone())) {
            changes.record_delete(collection, id.clone());
        }
    }
    changes
}

type Contained = FastSet<(CollectionName, EntityId)>;

/// Every entity held anywhere in the result tree, hidden includes too.
fn collect_contained(query: &Query, rows: &[ViewEntity], out: &mut Contained) {
    for row in rows {
        if let Some(id) = row.id() {
            out.insert((query.collection_name.clone(), SmolStr::new(id)));
        }
        for (key, include) in &query.include {
            if let Some(sub) = row.subqueries.get(key) {
                collect_contained(&include.subquery, sub.rows(), out);
            }
        }
    }
}

/// Deletes for entities touched by `batch` that `old` held somewhere and
/// `new` holds nowhere, including rows kept only by `exists` or order
/// mirrors.
pub fn evicted_changes(query: &Query, old: &[ViewEntity], new: &[ViewEntity], batch: &ChangeSet) -> ChangeSet {
    let mut before = Contained::default();
    let mut after = Contained::default();
    collect_contained(query, old, &mut before);
    collect_contained(query, new, &mut after);

    let mut changes = ChangeSet::new();
    for (collection, collection_changes) in batch.collections() {
        for id in collection_changes.changed_ids() {
            let key = (collection.clone(), id);
            if before.contains(&key) && !after.contains(&key) {
                changes.record_delete(collection, key.1);
            }
        }
    }
    changes
}

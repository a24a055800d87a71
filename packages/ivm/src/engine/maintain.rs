//! One maintenance pass: route a drained change set to every affected query
//! node and bring each root query's cached results up to date.
//!
//! Reads go through two stores. `committed` is the entity store before the
//! batch, `reader` is the same store with the batch layered on top. Root
//! results are staged and only published once the batch has been committed.

use crate::config::{IvmConfig, LimitStrategy};
use crate::engine::decompose::QueryNode;
use crate::engine::eval::matches_locally;
use crate::engine::merge::{find_row, merge_results, remove_rows, replace_rows};
use crate::engine::query::rewrite::{bind_entity, constrain_to_ids};
use crate::engine::query::{Query, QueryId};
use crate::engine::types::{ChangeSet, CollectionChanges, Entity, EntityId, FastIndexMap, FastSet, ViewEntity};
use crate::engine::view::{StagedView, ViewStore};
use crate::error::{IvmError, Result};
use crate::exec::QueryExecutor;
use crate::store::EntityStore;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, error, trace};

/// State of one changed entity on both sides of the batch.
#[derive(Debug)]
struct EntityChange {
    id: EntityId,
    before: Option<Entity>,
    after: Option<Entity>,
}

#[derive(Debug, Clone, Copy)]
enum Recompute {
    /// The batch touches at least as many entities as the query returns.
    Threshold,
    /// Bounded windows are re-run rather than backfilled.
    Limit,
}

pub(crate) struct MaintenancePass<'a> {
    views: &'a Mutex<ViewStore>,
    executor: &'a dyn QueryExecutor,
    reader: &'a dyn EntityStore,
    committed: &'a dyn EntityStore,
    config: &'a IvmConfig,
    staged: FastIndexMap<QueryId, StagedView>,
    /// Roots fetched in full during this pass; their results already reflect
    /// the whole batch.
    settled: FastSet<QueryId>,
    processed: usize,
}

impl<'a> MaintenancePass<'a> {
    pub(crate) fn new(
        views: &'a Mutex<ViewStore>,
        executor: &'a dyn QueryExecutor,
        reader: &'a dyn EntityStore,
        committed: &'a dyn EntityStore,
        config: &'a IvmConfig,
    ) -> Self {
        Self {
            views,
            executor,
            reader,
            committed,
            config,
            staged: FastIndexMap::default(),
            settled: FastSet::default(),
            processed: 0,
        }
    }

    /// Run the pass and hand back the staged results, ready to publish.
    pub(crate) async fn run(mut self, changes: &ChangeSet) -> FastIndexMap<QueryId, StagedView> {
        self.initialize_views().await;
        for (collection, collection_changes) in changes.collections() {
            self.apply_collection(collection, collection_changes).await;
        }
        debug!(
            staged = self.staged.len(),
            settled = self.settled.len(),
            entities = self.processed,
            "maintenance pass finished"
        );
        self.staged
    }

    /// Full fetch for queries that were never initialized or went stale.
    async fn initialize_views(&mut self) {
        let pending = self.views.lock().pending_fetches();
        for (id, query, recovering) in pending {
            match self.fetch(&query).await {
                Ok(results) => {
                    debug!(query_id = %id, rows = results.len(), recovering, "view initialized");
                    self.staged.insert(id.clone(), StagedView::fresh(query, results));
                    self.settled.insert(id);
                }
                Err(err) => self.report_error(&id, &err),
            }
        }
    }

    async fn apply_collection(&mut self, collection: &str, changes: &CollectionChanges) {
        let nodes: Vec<QueryNode> = self.views.lock().nodes().nodes_for(collection).to_vec();
        if nodes.is_empty() {
            return;
        }
        trace!(collection, nodes = nodes.len(), changed = changes.changed_count(), "routing changes");

        let mut entities = None;
        for node in &nodes {
            let id = &node.root_query_id;
            if self.settled.contains(id) {
                continue;
            }
            let Some(mut view) = self.take_view(id) else {
                debug!(query_id = %id, "no maintainable state for query, skipping node");
                continue;
            };
            if let Err(err) = self.process_node(node, changes, &mut entities, &mut view).await {
                view.stale = true;
                self.report_error(id, &err);
            }
            self.staged.insert(id.clone(), view);
        }
    }

    fn take_view(&mut self, query_id: &QueryId) -> Option<StagedView> {
        match self.staged.get(query_id) {
            Some(view) if view.stale => None,
            Some(_) => self.staged.shift_remove(query_id),
            None => self.views.lock().stage(query_id),
        }
    }

    fn report_error(&self, query_id: &QueryId, err: &IvmError) {
        error!(query_id = %query_id, error = %err, "query maintenance failed");
        let callbacks = self.views.lock().error_callbacks(query_id);
        for callback in callbacks {
            callback(err);
        }
    }

    async fn process_node(
        &mut self,
        node: &QueryNode,
        changes: &CollectionChanges,
        entities: &mut Option<Vec<EntityChange>>,
        view: &mut StagedView,
    ) -> Result<()> {
        if node.is_root() && self.try_fast_insert(changes, view).await? {
            return Ok(());
        }
        if !self.config.track_changes && changes.changed_count() >= view.results.len() {
            return self.recompute(&node.root_query_id, view, Recompute::Threshold).await;
        }
        if view.query.limit.is_some() {
            match self.config.limit_strategy {
                LimitStrategy::Recompute => {
                    return self.recompute(&node.root_query_id, view, Recompute::Limit).await;
                }
            }
        }

        if entities.is_none() {
            *entities = Some(self.load_entity_changes(node.collection(), changes).await?);
        }
        let Some(entities) = entities.as_deref() else {
            return Ok(());
        };
        for change in entities {
            let before = change.before.as_ref().is_some_and(|e| matches_locally(&node.query, e));
            let after = change.after.as_ref().is_some_and(|e| matches_locally(&node.query, e));
            if before || after {
                if node.is_root() {
                    self.maintain_root(view, change, after).await?;
                } else {
                    self.maintain_nested(node, view, change, before, after).await?;
                }
            }
            self.processed += 1;
            if self.config.yield_every > 0 && self.processed % self.config.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    /// Pure inserts into a root query that only reads its own collection:
    /// evaluate the new rows directly and merge them in. A payload for an id
    /// the store already holds merges onto that entity, so it takes the
    /// general path.
    async fn try_fast_insert(&self, changes: &CollectionChanges, view: &mut StagedView) -> Result<bool> {
        if !self.config.fast_insert_path || view.query.is_relational() || !changes.is_insert_only() {
            return Ok(false);
        }
        if changes.sets.keys().any(|id| find_row(&view.results, id).is_some()) {
            return Ok(false);
        }
        for id in changes.sets.keys() {
            let stored = self
                .committed
                .get_entity(&view.query.collection_name, id)
                .await
                .map_err(IvmError::Storage)?;
            if stored.is_some() {
                trace!(collection = %view.query.collection_name, %id, "insert over stored entity, leaving fast path");
                return Ok(false);
            }
        }
        let added: Vec<ViewEntity> = changes
            .sets
            .values()
            .filter(|entity| matches_locally(&view.query, entity))
            .cloned()
            .map(ViewEntity::new)
            .collect();
        trace!(collection = %view.query.collection_name, added = added.len(), "fast insert path");
        if !added.is_empty() {
            merge_results(&mut view.results, added, &view.query);
        }
        Ok(true)
    }

    async fn recompute(&mut self, query_id: &QueryId, view: &mut StagedView, reason: Recompute) -> Result<()> {
        let fresh = self.fetch(&view.query).await?;
        debug!(query_id = %query_id, ?reason, rows = fresh.len(), "recomputed view");
        view.results = fresh;
        view.wholesale |= matches!(reason, Recompute::Threshold);
        self.settled.insert(query_id.clone());
        Ok(())
    }

    async fn load_entity_changes(&self, collection: &str, changes: &CollectionChanges) -> Result<Vec<EntityChange>> {
        let mut loaded = Vec::with_capacity(changes.changed_count());
        for id in changes.changed_ids() {
            let before = self
                .committed
                .get_entity(collection, &id)
                .await
                .map_err(IvmError::Storage)?;
            let after = changes.entity_after(&id, before.as_ref());
            loaded.push(EntityChange { id, before, after });
        }
        Ok(loaded)
    }

    async fn maintain_root(&self, view: &mut StagedView, change: &EntityChange, matches_after: bool) -> Result<()> {
        if !matches_after {
            remove_rows(&mut view.results, &single(&change.id));
            return Ok(());
        }
        if !view.query.is_relational() {
            if let Some(after) = &change.after {
                replace_rows(&mut view.results, vec![ViewEntity::new(after.clone())], &view.query);
            }
            return Ok(());
        }
        let fresh = self.fetch(&constrain_to_ids(&view.query, &[change.id.clone()])).await?;
        if fresh.is_empty() {
            remove_rows(&mut view.results, &single(&change.id));
        } else {
            replace_rows(&mut view.results, fresh, &view.query);
        }
        Ok(())
    }

    async fn maintain_nested(
        &self,
        node: &QueryNode,
        view: &mut StagedView,
        change: &EntityChange,
        matches_before: bool,
        matches_after: bool,
    ) -> Result<()> {
        if matches_before {
            let connected = connected_roots(&view.results, node, &change.id);
            if !connected.is_empty() {
                if !matches_after && node.spliceable {
                    for row in view.results.iter_mut() {
                        row.remove_along(&node.path, &change.id);
                    }
                } else {
                    self.reverify(view, &connected).await?;
                }
            }
        }

        if matches_after {
            let bound = bind_entity(&view.query, &node.path, &change.id, node.include_only).ok_or_else(|| {
                IvmError::UnreachablePath {
                    query_id: node.root_query_id.clone(),
                    path: node.path.iter().map(ToString::to_string).collect::<Vec<_>>().join("/"),
                }
            })?;
            let rows = self.fetch(&bound).await?;
            trace!(query_id = %node.root_query_id, id = %change.id, rows = rows.len(), "bound entity to root");
            if node.include_only {
                merge_results(&mut view.results, rows, &view.query);
            } else {
                replace_rows(&mut view.results, rows, &view.query);
            }
        }
        Ok(())
    }

    /// Re-run the root query for `roots` and keep only the rows that still
    /// qualify. Another entity may satisfy the same subquery, so a root is
    /// never evicted without this check.
    async fn reverify(&self, view: &mut StagedView, roots: &[EntityId]) -> Result<()> {
        let fresh = self.fetch(&constrain_to_ids(&view.query, roots)).await?;
        let present: FastSet<EntityId> = fresh.iter().filter_map(|r| r.id().map(SmolStr::new)).collect();
        let missing: FastSet<EntityId> = roots.iter().filter(|id| !present.contains(*id)).cloned().collect();
        let evicted = remove_rows(&mut view.results, &missing);
        if !evicted.is_empty() {
            debug!(collection = %view.query.collection_name, evicted = evicted.len(), "evicted root rows");
        }
        replace_rows(&mut view.results, fresh, &view.query);
        Ok(())
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<ViewEntity>> {
        self.executor.fetch(query, self.reader).await.map_err(IvmError::Fetch)
    }
}

fn single(id: &EntityId) -> FastSet<EntityId> {
    std::iter::once(id.clone()).collect()
}

/// Cached root rows that reach `id` through the node's path, each root once
/// even when several paths lead to the entity.
fn connected_roots(results: &[ViewEntity], node: &QueryNode, id: &str) -> Vec<EntityId> {
    let mut seen = FastSet::default();
    results
        .iter()
        .filter(|row| row.contains_along(&node.path, id))
        .filter_map(|row| row.id().map(SmolStr::new))
        .filter(|root| seen.insert(root.clone()))
        .collect()
}

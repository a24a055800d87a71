//! Per-query cached state and listener bookkeeping.

use crate::engine::decompose::{QueryNodeIndex, QueryNodeType};
use crate::engine::query::{prepare, Query, QueryId};
use crate::engine::types::{ChangeSet, FastIndexMap, FastIndexSet, ViewEntity};
use crate::engine::update::{
    compute_result_hash, diff_results, evicted_changes, snapshot_changes, QueryUpdate, UpdateKind,
};
use crate::error::{IvmError, Result};
use indexmap::map::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

pub type ListenerId = u64;
pub type ResultCallback = Arc<dyn Fn(&QueryUpdate) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&IvmError) + Send + Sync>;

pub struct SubscribedQuery {
    pub id: QueryId,
    /// The query as the caller wrote it.
    pub og_query: Query,
    /// Internal form with synthetic includes.
    pub query: Query,
    listeners: FastIndexMap<ListenerId, ResultCallback>,
    error_callbacks: FastIndexMap<ListenerId, ErrorCallback>,
    uninitialized: FastIndexSet<ListenerId>,
    pub results: Option<Vec<ViewEntity>>,
    pub captured_changes: Option<ChangeSet>,
    pub has_changed: bool,
    /// Maintenance failed; recompute from scratch on the next pass.
    pub stale: bool,
}

impl SubscribedQuery {
    fn new(id: QueryId, og_query: Query) -> Self {
        let query = prepare(&og_query);
        Self {
            id,
            og_query,
            query,
            listeners: FastIndexMap::default(),
            error_callbacks: FastIndexMap::default(),
            uninitialized: FastIndexSet::default(),
            results: None,
            captured_changes: None,
            has_changed: false,
            stale: false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn error_callbacks(&self) -> Vec<ErrorCallback> {
        self.error_callbacks.values().cloned().collect()
    }

    pub fn needs_fetch(&self) -> bool {
        self.results.is_none() || self.stale
    }
}

/// Outcome of a maintenance pass for one query, held aside until the pass
/// has committed.
#[derive(Debug, Clone)]
pub struct StagedView {
    pub query: Query,
    pub results: Vec<ViewEntity>,
    /// Results were recomputed wholesale rather than maintained.
    pub wholesale: bool,
    pub stale: bool,
}

impl StagedView {
    pub fn fresh(query: Query, results: Vec<ViewEntity>) -> Self {
        Self {
            query,
            results,
            wholesale: false,
            stale: false,
        }
    }
}

pub struct Delivery {
    pub callback: ResultCallback,
    pub update: Arc<QueryUpdate>,
}

#[derive(Default)]
pub struct ViewStore {
    queries: FastIndexMap<QueryId, SubscribedQuery>,
    nodes: QueryNodeIndex,
    next_listener: ListenerId,
}

impl ViewStore {
    /// Add a listener, registering the query on first use.
    pub fn subscribe(
        &mut self,
        query: Query,
        on_results: ResultCallback,
        on_error: ErrorCallback,
    ) -> Result<(QueryId, ListenerId)> {
        query.validate()?;
        let id = query.canonical_id();
        self.next_listener += 1;
        let listener = self.next_listener;

        let record = match self.queries.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let record = SubscribedQuery::new(id.clone(), query);
                self.nodes.register(&id, &record.query, QueryNodeType::Root);
                debug!(query_id = %id, collection = %record.query.collection_name, "query registered");
                entry.insert(record)
            }
        };
        record.listeners.insert(listener, on_results);
        record.error_callbacks.insert(listener, on_error);
        record.uninitialized.insert(listener);
        Ok((id, listener))
    }

    /// Remove a listener; the query is torn down with its last listener.
    pub fn unsubscribe(&mut self, query_id: &QueryId, listener: ListenerId) -> bool {
        let Some(record) = self.queries.get_mut(query_id) else {
            return false;
        };
        let removed = record.listeners.shift_remove(&listener).is_some();
        record.error_callbacks.shift_remove(&listener);
        record.uninitialized.shift_remove(&listener);
        if record.listeners.is_empty() {
            self.queries.shift_remove(query_id);
            self.nodes.unregister(query_id);
            debug!(query_id = %query_id, "query torn down");
        }
        removed
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.queries.is_empty()
    }

    pub fn get(&self, query_id: &str) -> Option<&SubscribedQuery> {
        self.queries.get(query_id)
    }

    pub fn query_ids(&self) -> Vec<QueryId> {
        self.queries.keys().cloned().collect()
    }

    pub fn nodes(&self) -> &QueryNodeIndex {
        &self.nodes
    }

    /// Queries whose results must be fetched in full: never initialized or stale.
    pub fn pending_fetches(&self) -> Vec<(QueryId, Query, bool)> {
        self.queries
            .values()
            .filter(|q| q.needs_fetch())
            .map(|q| (q.id.clone(), q.query.clone(), q.results.is_some()))
            .collect()
    }

    /// Copy of a query's state for incremental maintenance. `None` when the
    /// query is gone or has no trustworthy results to maintain.
    pub fn stage(&self, query_id: &str) -> Option<StagedView> {
        let record = self.queries.get(query_id)?;
        if record.stale {
            return None;
        }
        Some(StagedView::fresh(record.query.clone(), record.results.clone()?))
    }

    pub fn error_callbacks(&self, query_id: &str) -> Vec<ErrorCallback> {
        self.queries
            .get(query_id)
            .map(SubscribedQuery::error_callbacks)
            .unwrap_or_default()
    }

    /// Install the outcome of a committed pass, capturing what moved.
    ///
    /// Captured changes are the visible difference between the previous and
    /// the new results, plus deletes for entities of `batch` the view no
    /// longer holds anywhere. A query whose rows were only reordered, or that
    /// was recomputed wholesale, is flagged for a snapshot delivery. A view
    /// whose maintenance failed keeps its last published results and is
    /// recomputed on the next pass.
    pub fn publish(&mut self, staged: FastIndexMap<QueryId, StagedView>, batch: &ChangeSet) {
        for (id, view) in staged {
            let Some(record) = self.queries.get_mut(&id) else {
                warn!(query_id = %id, "query unsubscribed during maintenance, dropping results");
                continue;
            };
            if view.stale {
                debug!(query_id = %id, "maintenance failed, keeping last published results");
                record.stale = true;
                continue;
            }
            record.stale = false;
            let Some(previous) = record.results.replace(view.results) else {
                continue;
            };
            let Some(current) = record.results.as_deref() else {
                continue;
            };
            let mut captured = diff_results(&record.query, &previous, current);
            if (view.wholesale || captured.is_empty()) && visible_hash(&previous) != visible_hash(current) {
                record.has_changed = true;
            }
            if !captured.is_empty() {
                captured.merge(evicted_changes(&record.query, &previous, current, batch));
                debug!(query_id = %id, changes = captured.total_changes(), "captured changes");
                record
                    .captured_changes
                    .get_or_insert_with(ChangeSet::new)
                    .merge(captured);
            }
        }
    }

    /// Build the deliveries of a flush and reset per-query change tracking.
    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for record in self.queries.values_mut() {
            let Some(results) = record.results.as_ref() else {
                continue;
            };
            let captured = record.captured_changes.take().unwrap_or_default();
            let has_changed = std::mem::take(&mut record.has_changed);
            let has_news = has_changed || !captured.is_empty();
            if !has_news && record.uninitialized.is_empty() {
                continue;
            }

            let visible = strip_all(results);
            let result_hash = compute_result_hash(&visible);
            let initial = (!record.uninitialized.is_empty()).then(|| {
                Arc::new(QueryUpdate {
                    query_id: record.id.clone(),
                    kind: UpdateKind::Initial,
                    changes: snapshot_changes(&record.query, &visible),
                    results: visible.clone(),
                    result_hash: result_hash.clone(),
                })
            });
            let diff = has_news.then(|| {
                Arc::new(QueryUpdate {
                    query_id: record.id.clone(),
                    kind: if has_changed {
                        UpdateKind::Snapshot
                    } else {
                        UpdateKind::Diff
                    },
                    changes: captured,
                    results: visible,
                    result_hash,
                })
            });

            for (listener, callback) in &record.listeners {
                let update = if record.uninitialized.shift_remove(listener) {
                    initial.clone()
                } else {
                    diff.clone()
                };
                if let Some(update) = update {
                    deliveries.push(Delivery {
                        callback: callback.clone(),
                        update,
                    });
                }
            }
        }
        deliveries
    }

    pub fn clear(&mut self) {
        self.queries.clear();
        self.nodes.clear();
    }
}

fn strip_all(rows: &[ViewEntity]) -> Vec<ViewEntity> {
    rows.iter().map(ViewEntity::strip_synthetic).collect()
}

fn visible_hash(rows: &[ViewEntity]) -> String {
    compute_result_hash(&strip_all(rows))
}

#[cfg(test)]
mod view_store_tests {
    use super::*;
    use crate::engine::query::FilterValue;
    use parking_lot::Mutex;
    use serde_json::json;

    fn noop_error() -> ErrorCallback {
        Arc::new(|_| {})
    }

    fn recorder() -> (ResultCallback, Arc<Mutex<Vec<UpdateKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |u: &QueryUpdate| sink.lock().push(u.kind)), seen)
    }

    fn query() -> Query {
        Query::new("users").exists(Query::new("posts").where_eq("userId", FilterValue::parent(1, "id")))
    }

    fn staged(store: &ViewStore, id: &QueryId, results: Vec<ViewEntity>) -> FastIndexMap<QueryId, StagedView> {
        let record = store.get(id).unwrap();
        let mut map = FastIndexMap::default();
        map.insert(id.clone(), StagedView::fresh(record.query.clone(), results));
        map
    }

    #[test]
    fn test_same_query_shares_record() {
        let mut store = ViewStore::default();
        let (cb, _) = recorder();
        let (a, la) = store.subscribe(query(), cb.clone(), noop_error()).unwrap();
        let (b, lb) = store.subscribe(query(), cb, noop_error()).unwrap();
        assert_eq!(a, b);
        assert_ne!(la, lb);
        assert_eq!(store.query_ids().len(), 1);
        assert_eq!(store.nodes().node_count(), 2);

        assert!(store.unsubscribe(&a, la));
        assert!(store.has_subscriptions());
        assert!(store.unsubscribe(&a, lb));
        assert!(!store.has_subscriptions());
        assert_eq!(store.nodes().node_count(), 0);
    }

    #[test]
    fn test_flush_initial_then_only_on_news() {
        let mut store = ViewStore::default();
        let (cb, seen) = recorder();
        let (id, _) = store.subscribe(query(), cb, noop_error()).unwrap();

        assert!(store.take_deliveries().is_empty());

        let rows = vec![ViewEntity::new(json!({ "id": "1" }).into())];
        store.publish(staged(&store, &id, rows.clone()), &ChangeSet::new());
        for d in store.take_deliveries() {
            (d.callback)(&d.update);
        }
        assert_eq!(*seen.lock(), vec![UpdateKind::Initial]);

        store.publish(staged(&store, &id, rows), &ChangeSet::new());
        assert!(store.take_deliveries().is_empty());

        store.publish(staged(&store, &id, vec![]), &ChangeSet::new());
        let deliveries = store.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].update.kind, UpdateKind::Diff);
        assert!(deliveries[0].update.changes.collection("users").unwrap().deletes.contains("1"));
        assert!(store.get(&id).unwrap().captured_changes.is_none());
    }

    #[test]
    fn test_reorder_only_flags_snapshot() {
        let mut store = ViewStore::default();
        let (cb, _) = recorder();
        let (id, _) = store.subscribe(Query::new("users"), cb, noop_error()).unwrap();
        let a = ViewEntity::new(json!({ "id": "1" }).into());
        let b = ViewEntity::new(json!({ "id": "2" }).into());
        store.publish(staged(&store, &id, vec![a.clone(), b.clone()]), &ChangeSet::new());
        store.take_deliveries();

        store.publish(staged(&store, &id, vec![b, a]), &ChangeSet::new());
        let deliveries = store.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].update.kind, UpdateKind::Snapshot);
        assert!(deliveries[0].update.changes.is_empty());
    }

    #[test]
    fn test_failed_view_keeps_last_published_results() {
        let mut store = ViewStore::default();
        let (cb, seen) = recorder();
        let (id, _) = store.subscribe(Query::new("users"), cb, noop_error()).unwrap();
        assert!(store.stage(&id).is_none());

        let rows = vec![ViewEntity::new(json!({ "id": "1" }).into())];
        store.publish(staged(&store, &id, rows), &ChangeSet::new());
        for d in store.take_deliveries() {
            (d.callback)(&d.update);
        }

        let mut half_done = StagedView::fresh(Query::new("users"), vec![]);
        half_done.stale = true;
        let mut map = FastIndexMap::default();
        map.insert(id.clone(), half_done);
        store.publish(map, &ChangeSet::new().delete("users", "1"));

        assert!(store.take_deliveries().is_empty());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(store.get(&id).unwrap().results.as_ref().map(Vec::len), Some(1));
        assert!(store.stage(&id).is_none());
        assert_eq!(store.pending_fetches().len(), 1);
    }

    #[test]
    fn test_invalid_query_rejected() {
        let mut store = ViewStore::default();
        let (cb, _) = recorder();
        let bad = Query::new("posts").where_eq("userId", FilterValue::parent(1, "id"));
        assert!(store.subscribe(bad, cb, noop_error()).is_err());
        assert!(!store.has_subscriptions());
    }
}

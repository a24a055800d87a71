//! Shared helpers for the integration tests: an engine over the in-memory
//! store, a listener that records every delivery, and a replica that applies
//! delivered change sets.

#![allow(dead_code)]

use ivm::{
    ChangeSet, Entity, FilterValue, Ivm, IvmConfig, MemoryExecutor, MemoryStore, Query, QueryExecutor,
    QueryUpdate, Subscription, ViewEntity,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use ulid::Ulid;

pub type Engine = Ivm<MemoryStore, MemoryExecutor>;

pub fn setup() -> Engine {
    setup_with(IvmConfig::default())
}

pub fn setup_with(config: IvmConfig) -> Engine {
    ivm::logging::init_test_tracing();
    Ivm::in_memory(config)
}

/// Generate a unique id using ULID
pub fn generate_id() -> String {
    Ulid::new().to_string()
}

pub fn user(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

pub fn post(id: &str, user_id: &str, published: bool) -> Value {
    json!({ "id": id, "userId": user_id, "published": published })
}

/// Users with at least one published post.
pub fn users_with_published_posts() -> Query {
    Query::new("users").exists(
        Query::new("posts")
            .where_eq("userId", FilterValue::parent(1, "id"))
            .where_eq("published", true),
    )
}

pub fn seed(engine: &Engine, collection: &str, rows: Vec<Value>) {
    engine.store().seed(collection, rows.into_iter().map(Entity::from));
}

/// Buffer, maintain and flush in one go.
pub async fn commit(engine: &Engine, changes: ChangeSet) {
    engine.buffer_changes(changes).await.unwrap();
    engine.update_views().await.unwrap();
    engine.flush_changes_to_listeners().await;
}

/// Run a pass with nothing buffered, e.g. to initialize new subscriptions.
pub async fn settle(engine: &Engine) {
    engine.update_views().await.unwrap();
    engine.flush_changes_to_listeners().await;
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub updates: Arc<Mutex<Vec<QueryUpdate>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn subscribe(&self, engine: &Engine, query: Query) -> Subscription {
        let updates = self.updates.clone();
        let errors = self.errors.clone();
        engine
            .subscribe(
                query,
                move |u: &QueryUpdate| updates.lock().push(u.clone()),
                move |e| errors.lock().push(e.to_string()),
            )
            .unwrap()
    }

    pub fn count(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn last(&self) -> QueryUpdate {
        self.updates.lock().last().cloned().unwrap()
    }

    pub fn last_ids(&self) -> Vec<String> {
        self.last().ids().into_iter().map(String::from).collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

pub fn ids(rows: &[ViewEntity]) -> Vec<String> {
    rows.iter().filter_map(|r| r.id().map(String::from)).collect()
}

/// Full execution against the committed store, as listeners see it.
pub async fn raw_fetch(engine: &Engine, query: &Query) -> Vec<ViewEntity> {
    let prepared = ivm::engine::query::prepare(query);
    MemoryExecutor::new()
        .fetch(&prepared, engine.store().as_ref())
        .await
        .unwrap()
        .iter()
        .map(ViewEntity::strip_synthetic)
        .collect()
}

/// Collection-keyed copy of everything a listener was told about.
#[derive(Default, Debug, PartialEq)]
pub struct Replica(pub BTreeMap<String, BTreeMap<String, Entity>>);

impl Replica {
    pub fn apply(&mut self, changes: &ChangeSet) {
        for (collection, c) in changes.collections() {
            let table = self.0.entry(collection.to_string()).or_default();
            for id in &c.deletes {
                table.remove(id.as_str());
            }
            for (id, entity) in &c.sets {
                table.insert(id.to_string(), entity.clone());
            }
        }
        self.0.retain(|_, table| !table.is_empty());
    }

    /// Replica holding exactly the entities visible in `results`.
    pub fn of(query: &Query, results: &[ViewEntity]) -> Self {
        let mut replica = Replica::default();
        replica.apply(&ivm::engine::update::snapshot_changes(query, results));
        replica
    }
}

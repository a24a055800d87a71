//! Full query execution seam.

mod memory;

pub use memory::MemoryExecutor;

use crate::engine::query::Query;
use crate::engine::types::ViewEntity;
use crate::store::EntityStore;
use async_trait::async_trait;

/// Runs a query from scratch against a store.
///
/// Results are filtered, sorted by the query's order (then id), windowed by
/// `after` and `limit`, and carry every include of the query, synthetic ones
/// included.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch(&self, query: &Query, store: &dyn EntityStore) -> anyhow::Result<Vec<ViewEntity>>;
}

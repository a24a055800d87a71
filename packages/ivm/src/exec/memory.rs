use super::QueryExecutor;
use crate::engine::eval::{after_cursor, compare_in_scope, sort_rows};
use crate::engine::query::{Cardinality, Filter, IncludeKey, Query, SyntheticKey};
use crate::engine::types::{Entity, SubResult, ViewEntity};
use crate::store::EntityStore;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::trace;

/// Straightforward scan-filter-sort executor.
///
/// Variables resolve against the chain of enclosing rows, innermost last.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryExecutor;

impl MemoryExecutor {
    pub fn new() -> Self {
        Self
    }

    fn execute<'a>(
        &'a self,
        query: &'a Query,
        store: &'a dyn EntityStore,
        parents: &'a [Entity],
    ) -> BoxFuture<'a, Result<Vec<ViewEntity>>> {
        async move {
            let mut rows = Vec::new();
            for entity in store.scan(&query.collection_name).await? {
                if self.matches_all(&query.filters, &entity, store, parents).await? {
                    rows.push(ViewEntity::new(entity));
                }
            }

            // Order includes are needed to sort and window.
            for row in rows.iter_mut() {
                self.load_includes(query, row, store, parents, true).await?;
            }
            rows.retain(|row| after_cursor(row, query));
            sort_rows(&mut rows, &query.order);
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            for row in rows.iter_mut() {
                self.load_includes(query, row, store, parents, false).await?;
            }

            trace!(collection = %query.collection_name, rows = rows.len(), "executed");
            Ok(rows)
        }
        .boxed()
    }

    async fn load_includes(
        &self,
        query: &Query,
        row: &mut ViewEntity,
        store: &dyn EntityStore,
        parents: &[Entity],
        order_only: bool,
    ) -> Result<()> {
        let mut scope = parents.to_vec();
        scope.push(row.data.clone());
        for (key, include) in &query.include {
            let is_order = matches!(key, IncludeKey::Synthetic(SyntheticKey::Order(_)));
            if is_order != order_only {
                continue;
            }
            let mut found = self.execute(&include.subquery, store, &scope).await?;
            let result = match include.cardinality {
                Cardinality::One if found.is_empty() => SubResult::One(None),
                Cardinality::One => SubResult::One(Some(Box::new(found.swap_remove(0)))),
                Cardinality::Many => SubResult::Many(found),
            };
            row.subqueries.insert(key.clone(), result);
        }
        Ok(())
    }

    fn matches_all<'a>(
        &'a self,
        filters: &'a [Filter],
        entity: &'a Entity,
        store: &'a dyn EntityStore,
        parents: &'a [Entity],
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            for filter in filters {
                if !self.matches(filter, entity, store, parents).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        .boxed()
    }

    fn matches<'a>(
        &'a self,
        filter: &'a Filter,
        entity: &'a Entity,
        store: &'a dyn EntityStore,
        parents: &'a [Entity],
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match filter {
                Filter::Compare {
                    attribute,
                    op,
                    value,
                } => Ok(compare_in_scope(attribute, *op, value, entity, parents)),
                Filter::And { filters } => self.matches_all(filters, entity, store, parents).await,
                Filter::Or { filters } => {
                    for f in filters {
                        if self.matches(f, entity, store, parents).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Filter::Exists { subquery } => {
                    let mut scope = parents.to_vec();
                    scope.push(entity.clone());
                    let probe = subquery.membership_probe();
                    let found = self.execute(&probe, store, &scope).await?;
                    Ok(!found.is_empty())
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn fetch(&self, query: &Query, store: &dyn EntityStore) -> Result<Vec<ViewEntity>> {
        self.execute(query, store, &[]).await
    }
}

#[cfg(test)]
mod memory_executor_tests {
    use super::*;
    use crate::engine::query::{prepare, Direction, FilterValue};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "users",
            [
                Entity::from(json!({ "id": "1", "name": "Ann" })),
                Entity::from(json!({ "id": "2", "name": "Bob" })),
                Entity::from(json!({ "id": "3", "name": "Cid" })),
            ],
        );
        store.seed(
            "posts",
            [
                Entity::from(json!({ "id": "p1", "userId": "1", "likes": 5 })),
                Entity::from(json!({ "id": "p2", "userId": "2", "likes": 1 })),
                Entity::from(json!({ "id": "p3", "userId": "1", "likes": 9 })),
            ],
        );
        store
    }

    fn ids(rows: &[ViewEntity]) -> Vec<&str> {
        rows.iter().filter_map(ViewEntity::id).collect()
    }

    #[tokio::test]
    async fn test_exists_filter() {
        let store = store();
        let query = Query::new("users")
            .exists(Query::new("posts").where_eq("userId", FilterValue::parent(1, "id")));
        let rows = MemoryExecutor.fetch(&prepare(&query), &store).await.unwrap();
        assert_eq!(ids(&rows), vec!["1", "2"]);
        // synthetic include mirrors the exists subquery
        let hidden = rows[0].subqueries.len();
        assert_eq!(hidden, 1);
    }

    #[tokio::test]
    async fn test_include_ordered_and_limited() {
        let store = store();
        let query = Query::new("users").include_many(
            "top",
            Query::new("posts")
                .where_eq("userId", FilterValue::parent(1, "id"))
                .order_by("likes", Direction::Desc)
                .limit(1),
        );
        let rows = MemoryExecutor.fetch(&query, &store).await.unwrap();
        let ann = &rows[0];
        let top = ann.subquery(&IncludeKey::user("top")).unwrap();
        assert_eq!(ids(top.rows()), vec!["p3"]);
        assert!(rows[2].subquery(&IncludeKey::user("top")).unwrap().rows().is_empty());
    }

    #[tokio::test]
    async fn test_relational_order() {
        let store = store();
        let author = Query::new("users").where_eq("id", FilterValue::parent(1, "userId"));
        let query = Query::new("posts").order_by_relation("author.name", Direction::Desc, author);
        let rows = MemoryExecutor.fetch(&prepare(&query), &store).await.unwrap();
        assert_eq!(ids(&rows), vec!["p2", "p1", "p3"]);
    }
}

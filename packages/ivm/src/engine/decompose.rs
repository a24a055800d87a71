//! Query decomposition: one node per reachable subquery, indexed by the
//! collection it reads, so a change can be routed to every affected root.

use crate::engine::query::{Cardinality, IncludeKey, Query, QueryId, SyntheticKey};
use crate::engine::types::{CollectionName, FastMap, FastSet};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::debug;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryNodeType {
    Root,
    Exists,
    Include,
    Order,
}

impl QueryNodeType {
    fn of_key(key: &IncludeKey) -> Self {
        match key {
            IncludeKey::User(_) => QueryNodeType::Include,
            IncludeKey::Synthetic(SyntheticKey::Exists(_)) => QueryNodeType::Exists,
            IncludeKey::Synthetic(SyntheticKey::Order(_)) => QueryNodeType::Order,
        }
    }
}

pub type NodePath = SmallVec<[IncludeKey; 4]>;

#[derive(Debug, Clone)]
pub struct QueryNode {
    pub root_query_id: QueryId,
    pub query: Query,
    pub node_type: QueryNodeType,
    /// Include keys from the root query down to this node.
    pub path: NodePath,
    /// Every hop is a user include.
    pub include_only: bool,
    /// Every hop is an unbounded many-include, so removing a row there never
    /// pulls another row into view.
    pub spliceable: bool,
}

impl QueryNode {
    pub fn collection(&self) -> &CollectionName {
        &self.query.collection_name
    }

    pub fn is_root(&self) -> bool {
        self.node_type == QueryNodeType::Root
    }
}

#[derive(Debug, Default)]
pub struct QueryNodeIndex {
    by_collection: FastMap<CollectionName, Vec<QueryNode>>,
    registered: FastSet<QueryId>,
}

impl QueryNodeIndex {
    /// Record the nodes of a query in internal form. Registering the same
    /// root twice is a no-op. Returns the number of nodes added.
    pub fn register(&mut self, root_query_id: &QueryId, query: &Query, node_type: QueryNodeType) -> usize {
        if !self.registered.insert(root_query_id.clone()) {
            return 0;
        }
        let mut path = NodePath::new();
        let added = self.register_node(root_query_id, query, node_type, &mut path, true, true);
        debug!(query_id = %root_query_id, nodes = added, "registered query nodes");
        added
    }

    fn register_node(
        &mut self,
        root_query_id: &QueryId,
        query: &Query,
        node_type: QueryNodeType,
        path: &mut NodePath,
        include_only: bool,
        spliceable: bool,
    ) -> usize {
        self.by_collection
            .entry(query.collection_name.clone())
            .or_default()
            .push(QueryNode {
                root_query_id: root_query_id.clone(),
                query: query.clone(),
                node_type,
                path: path.clone(),
                include_only,
                spliceable,
            });

        let mut added = 1;
        for (key, include) in &query.include {
            let child_type = QueryNodeType::of_key(key);
            let unbounded = include.cardinality == Cardinality::Many && include.subquery.limit.is_none();
            path.push(key.clone());
            added += self.register_node(
                root_query_id,
                &include.subquery,
                child_type,
                path,
                include_only && key.is_user(),
                spliceable && key.is_user() && unbounded,
            );
            path.pop();
        }
        added
    }

    /// Remove every node of a root query.
    pub fn unregister(&mut self, root_query_id: &QueryId) {
        if !self.registered.remove(root_query_id) {
            return;
        }
        self.by_collection.retain(|_, nodes| {
            nodes.retain(|n| &n.root_query_id != root_query_id);
            !nodes.is_empty()
        });
        debug!(query_id = %root_query_id, "unregistered query nodes");
    }

    pub fn nodes_for(&self, collection: &str) -> &[QueryNode] {
        self.by_collection
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.by_collection.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.by_collection.clear();
        self.registered.clear();
    }
}

#[cfg(test)]
mod decompose_tests {
    use super::*;
    use crate::engine::query::{prepare, Direction, FilterValue};

    fn query() -> Query {
        let author = Query::new("users").where_eq("id", FilterValue::parent(1, "userId"));
        let comments = Query::new("comments").where_eq("postId", FilterValue::parent(1, "id"));
        prepare(
            &Query::new("users")
                .exists(Query::new("posts").where_eq("userId", FilterValue::parent(1, "id")))
                .include_many(
                    "posts",
                    Query::new("posts")
                        .where_eq("userId", FilterValue::parent(1, "id"))
                        .order_by_relation("author.name", Direction::Asc, author)
                        .include_many("comments", comments),
                ),
        )
    }

    #[test]
    fn test_register_tags_every_subquery() {
        let mut index = QueryNodeIndex::default();
        let id = QueryId::from("q1");
        assert_eq!(index.register(&id, &query(), QueryNodeType::Root), 5);

        let users: Vec<_> = index.nodes_for("users").iter().map(|n| n.node_type).collect();
        assert_eq!(users, vec![QueryNodeType::Root, QueryNodeType::Order]);

        let posts = index.nodes_for("posts");
        assert_eq!(posts.len(), 2);
        let exists = posts.iter().find(|n| n.node_type == QueryNodeType::Exists).unwrap();
        assert!(!exists.include_only);
        let included = posts.iter().find(|n| n.node_type == QueryNodeType::Include).unwrap();
        assert!(included.include_only && included.spliceable);
        assert_eq!(included.path.as_slice(), &[IncludeKey::user("posts")]);

        let comments = &index.nodes_for("comments")[0];
        assert_eq!(comments.path.len(), 2);
        assert!(comments.root_query_id == id);
    }

    #[test]
    fn test_register_is_idempotent_and_unregister_tears_down() {
        let mut index = QueryNodeIndex::default();
        let id = QueryId::from("q1");
        index.register(&id, &query(), QueryNodeType::Root);
        assert_eq!(index.register(&id, &query(), QueryNodeType::Root), 0);
        assert_eq!(index.node_count(), 5);

        let other = QueryId::from("q2");
        index.register(&other, &Query::new("users"), QueryNodeType::Root);
        index.unregister(&id);
        assert_eq!(index.node_count(), 1);
        assert!(index.nodes_for("posts").is_empty());
        assert_eq!(index.register(&id, &query(), QueryNodeType::Root), 5, "torn down roots register again");
        assert_eq!(index.node_count(), 6);
    }
}

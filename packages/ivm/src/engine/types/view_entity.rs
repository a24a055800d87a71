use super::entity::Entity;
use crate::engine::query::IncludeKey;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of one include on one row.
#[derive(Debug, Clone, PartialEq)]
pub enum SubResult {
    One(Option<Box<ViewEntity>>),
    Many(Vec<ViewEntity>),
}

impl SubResult {
    pub fn rows(&self) -> &[ViewEntity] {
        match self {
            SubResult::Many(rows) => rows.as_slice(),
            SubResult::One(Some(row)) => std::slice::from_ref(row.as_ref()),
            SubResult::One(None) => &[],
        }
    }

    fn strip_synthetic(&self) -> SubResult {
        match self {
            SubResult::Many(rows) => {
                SubResult::Many(rows.iter().map(ViewEntity::strip_synthetic).collect())
            }
            SubResult::One(row) => {
                SubResult::One(row.as_ref().map(|r| Box::new(r.strip_synthetic())))
            }
        }
    }
}

/// One row of a query result, with its include results attached.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewEntity {
    pub data: Entity,
    pub subqueries: BTreeMap<IncludeKey, SubResult>,
}

impl ViewEntity {
    pub fn new(data: Entity) -> Self {
        Self {
            data,
            subqueries: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.data.id()
    }

    pub fn subquery(&self, key: &IncludeKey) -> Option<&SubResult> {
        self.subqueries.get(key)
    }

    /// Copy without synthetic (engine-internal) includes, at every depth.
    pub fn strip_synthetic(&self) -> ViewEntity {
        ViewEntity {
            data: self.data.clone(),
            subqueries: self
                .subqueries
                .iter()
                .filter(|(key, _)| key.is_user())
                .map(|(key, sub)| (key.clone(), sub.strip_synthetic()))
                .collect(),
        }
    }

    /// Rows reached by following `path` through include results.
    pub fn rows_along<'a>(&'a self, path: &[IncludeKey]) -> Vec<&'a ViewEntity> {
        let Some((head, rest)) = path.split_first() else {
            return vec![self];
        };
        match self.subqueries.get(head) {
            Some(sub) => sub.rows().iter().flat_map(|r| r.rows_along(rest)).collect(),
            None => Vec::new(),
        }
    }

    /// Whether an entity with `id` sits at the end of `path` below this row.
    pub fn contains_along(&self, path: &[IncludeKey], id: &str) -> bool {
        !path.is_empty() && self.rows_along(path).iter().any(|r| r.id() == Some(id))
    }

    /// Remove every occurrence of `id` at the end of `path`.
    pub fn remove_along(&mut self, path: &[IncludeKey], id: &str) -> bool {
        let Some((head, rest)) = path.split_first() else {
            return false;
        };
        let Some(sub) = self.subqueries.get_mut(head) else {
            return false;
        };
        if rest.is_empty() {
            return match sub {
                SubResult::Many(rows) => {
                    let before = rows.len();
                    rows.retain(|r| r.id() != Some(id));
                    rows.len() != before
                }
                SubResult::One(slot) => {
                    if slot.as_ref().and_then(|r| r.id()) == Some(id) {
                        *slot = None;
                        true
                    } else {
                        false
                    }
                }
            };
        }
        let mut removed = false;
        match sub {
            SubResult::Many(rows) => {
                for row in rows.iter_mut() {
                    removed |= row.remove_along(rest, id);
                }
            }
            SubResult::One(Some(row)) => removed = row.remove_along(rest, id),
            SubResult::One(None) => {}
        }
        removed
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for ViewEntity {
    /// Attributes first, then each include under its key.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.data.fields().len() + self.subqueries.len()))?;
        for (key, value) in self.data.fields() {
            map.serialize_entry(key, value)?;
        }
        for (key, sub) in &self.subqueries {
            let key = String::from(key.clone());
            match sub {
                SubResult::Many(rows) => map.serialize_entry(&key, rows)?,
                SubResult::One(row) => map.serialize_entry(&key, row)?,
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod view_entity_tests {
    use super::*;
    use crate::engine::query::SyntheticKey;
    use serde_json::json;

    fn row(value: Value) -> ViewEntity {
        ViewEntity::new(value.into())
    }

    fn user_with_posts() -> ViewEntity {
        let mut user = row(json!({ "id": "1", "name": "Ann" }));
        user.subqueries.insert(
            IncludeKey::user("posts"),
            SubResult::Many(vec![row(json!({ "id": "p1" })), row(json!({ "id": "p2" }))]),
        );
        user.subqueries.insert(
            IncludeKey::Synthetic(SyntheticKey::Exists(0)),
            SubResult::Many(vec![row(json!({ "id": "p1" }))]),
        );
        user
    }

    #[test]
    fn test_strip_synthetic_drops_hidden_includes() {
        let stripped = user_with_posts().strip_synthetic();
        assert_eq!(stripped.subqueries.len(), 1);
        assert!(stripped.subquery(&IncludeKey::user("posts")).is_some());
    }

    #[test]
    fn test_contains_and_remove_along_path() {
        let mut user = user_with_posts();
        let path = [IncludeKey::user("posts")];
        assert!(user.contains_along(&path, "p2"));
        assert!(user.remove_along(&path, "p2"));
        assert!(!user.contains_along(&path, "p2"));
        assert!(!user.remove_along(&path, "p2"));
        assert!(!user.contains_along(&[], "1"));
    }

    #[test]
    fn test_serialize_renders_includes_under_key() {
        let json = user_with_posts().strip_synthetic().to_json();
        assert_eq!(json["name"], json!("Ann"));
        assert_eq!(json["posts"][1]["id"], json!("p2"));
    }
}

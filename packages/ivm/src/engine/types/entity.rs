use super::path::Path;
use super::value::DataValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;

pub type EntityId = SmolStr;
pub type CollectionName = SmolStr;

pub const ID_FIELD: &str = "id";

/// A stored row: a flat map of attributes, identified by its `id` attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(BTreeMap<SmolStr, DataValue>);

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(|v| v.as_str())
    }

    pub fn has_id(&self) -> bool {
        self.id().is_some()
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.0.get(key)
    }

    /// Resolve a dotted path; the first segment is an attribute of this entity.
    pub fn resolve(&self, path: &Path) -> Option<&DataValue> {
        let (head, rest) = path.segments().split_first()?;
        let mut current = self.0.get(head)?;
        for segment in rest {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn insert(&mut self, key: impl Into<SmolStr>, value: impl Into<DataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<SmolStr>, value: impl Into<DataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Shallow merge: every top-level attribute of `partial` overwrites ours.
    pub fn merge_partial(&mut self, partial: &Entity) {
        for (key, value) in &partial.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// State after applying `partial` on top of `before` (or on nothing).
    pub fn merged(before: Option<&Entity>, partial: &Entity) -> Entity {
        match before {
            Some(before) => {
                let mut next = before.clone();
                next.merge_partial(partial);
                next
            }
            None => partial.clone(),
        }
    }

    pub fn fields(&self) -> &BTreeMap<SmolStr, DataValue> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(v.clone())))
                .collect(),
        )
    }
}

impl From<Value> for Entity {
    /// Non-object JSON yields an empty entity.
    fn from(v: Value) -> Self {
        match DataValue::from(v) {
            DataValue::Object(map) => Entity(map),
            _ => Entity::default(),
        }
    }
}

impl FromIterator<(SmolStr, DataValue)> for Entity {
    fn from_iter<I: IntoIterator<Item = (SmolStr, DataValue)>>(iter: I) -> Self {
        Entity(iter.into_iter().collect())
    }
}

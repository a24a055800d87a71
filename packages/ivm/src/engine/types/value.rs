use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Attribute value stored on an entity.
///
/// Objects keep their keys sorted so that two structurally equal values
/// serialize identically (query ids and result hashes rely on this).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum DataValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(SmolStr),
    Array(Vec<DataValue>),
    Object(BTreeMap<SmolStr, DataValue>),
}

pub(crate) static NULL_VALUE: DataValue = DataValue::Null;

impl DataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<SmolStr, DataValue>> {
        match self {
            DataValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<DataValue>> {
        match self {
            DataValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get nested value by key (for objects)
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_object()?.get(key)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Ordering rank used when comparing values of different kinds.
    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            DataValue::Null => 0,
            DataValue::Bool(_) => 1,
            DataValue::Number(_) => 2,
            DataValue::Str(_) => 3,
            DataValue::Array(_) => 4,
            DataValue::Object(_) => 5,
        }
    }
}

impl From<Value> for DataValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => DataValue::Null,
            Value::Bool(b) => DataValue::Bool(b),
            Value::Number(n) => DataValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => DataValue::Str(SmolStr::from(s)),
            Value::Array(arr) => DataValue::Array(arr.into_iter().map(DataValue::from).collect()),
            Value::Object(obj) => DataValue::Object(
                obj.into_iter()
                    .map(|(k, v)| (SmolStr::from(k), DataValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<DataValue> for Value {
    fn from(val: DataValue) -> Self {
        match val {
            DataValue::Null => Value::Null,
            DataValue::Bool(b) => Value::Bool(b),
            DataValue::Number(n) => json!(n),
            DataValue::Str(s) => Value::String(s.to_string()),
            DataValue::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            DataValue::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k.to_string(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::Str(SmolStr::new(s))
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::Str(SmolStr::from(s))
    }
}

impl From<SmolStr> for DataValue {
    fn from(s: SmolStr) -> Self {
        DataValue::Str(s)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::Number(n)
    }
}

impl From<i64> for DataValue {
    fn from(n: i64) -> Self {
        DataValue::Number(n as f64)
    }
}

impl From<i32> for DataValue {
    fn from(n: i32) -> Self {
        DataValue::Number(f64::from(n))
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Bool(b)
    }
}

impl<T: Into<DataValue>> From<Vec<T>> for DataValue {
    fn from(items: Vec<T>) -> Self {
        DataValue::Array(items.into_iter().map(Into::into).collect())
    }
}

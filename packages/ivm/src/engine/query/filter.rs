use super::model::Query;
use crate::engine::types::{DataValue, Path, ID_FIELD};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Attribute value is one of the given array.
    In,
    Nin,
    Prefix,
    /// Attribute is an array containing the value.
    Has,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::In => "in",
            CompareOp::Nin => "nin",
            CompareOp::Prefix => "prefix",
            CompareOp::Has => "has",
        };
        f.write_str(s)
    }
}

/// Reference to an attribute of an enclosing row.
///
/// `level` 1 is the row of the immediately enclosing query, 2 the one above.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    #[serde(rename = "$parent")]
    pub level: usize,
    #[serde(rename = "$path")]
    pub path: Path,
}

impl<'de> Deserialize<'de> for Variable {
    /// Only the object form is accepted, so literal arrays never parse as variables.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "$parent")]
            level: usize,
            #[serde(rename = "$path")]
            path: Path,
        }

        let map = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let raw: Raw = serde_json::from_value(Value::Object(map)).map_err(D::Error::custom)?;
        Ok(Variable {
            level: raw.level,
            path: raw.path,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum FilterValue {
    Variable(Variable),
    Literal(DataValue),
}

impl FilterValue {
    pub fn parent(level: usize, path: &str) -> Self {
        FilterValue::Variable(Variable {
            level,
            path: Path::new(path),
        })
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, FilterValue::Variable(_))
    }
}

macro_rules! literal_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FilterValue {
            fn from(value: $ty) -> Self {
                FilterValue::Literal(value.into())
            }
        })*
    };
}

literal_from!(DataValue, &str, String, SmolStr, f64, i64, i32, bool);

impl From<Variable> for FilterValue {
    fn from(var: Variable) -> Self {
        FilterValue::Variable(var)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    Compare {
        attribute: Path,
        op: CompareOp,
        value: FilterValue,
    },
    And {
        filters: Vec<Filter>,
    },
    Or {
        filters: Vec<Filter>,
    },
    /// True when the subquery, evaluated with this row as its parent, has a row.
    Exists {
        subquery: Box<Query>,
    },
}

impl Filter {
    pub fn compare(attribute: &str, op: CompareOp, value: impl Into<FilterValue>) -> Self {
        Filter::Compare {
            attribute: Path::new(attribute),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: &str, value: impl Into<FilterValue>) -> Self {
        Self::compare(attribute, CompareOp::Eq, value)
    }

    pub fn id_eq(id: &str) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn id_in(ids: &[SmolStr]) -> Self {
        let values: Vec<DataValue> = ids.iter().cloned().map(DataValue::Str).collect();
        Self::compare(ID_FIELD, CompareOp::In, DataValue::Array(values))
    }

    pub fn exists(subquery: Query) -> Self {
        Filter::Exists {
            subquery: Box::new(subquery),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    /// Every `exists` subquery under this filter, depth-first.
    pub fn collect_exists<'a>(&'a self, out: &mut Vec<&'a Query>) {
        match self {
            Filter::Exists { subquery } => out.push(subquery),
            Filter::And { filters } | Filter::Or { filters } => {
                for filter in filters {
                    filter.collect_exists(out);
                }
            }
            Filter::Compare { .. } => {}
        }
    }

    pub fn has_exists(&self) -> bool {
        match self {
            Filter::Exists { .. } => true,
            Filter::And { filters } | Filter::Or { filters } => {
                filters.iter().any(Filter::has_exists)
            }
            Filter::Compare { .. } => false,
        }
    }

    /// Deepest variable level referenced directly by this filter
    /// (not counting nested `exists` subqueries, which shift levels).
    pub(crate) fn max_variable_level(&self) -> usize {
        match self {
            Filter::Compare {
                value: FilterValue::Variable(var),
                ..
            } => var.level,
            Filter::Compare { .. } | Filter::Exists { .. } => 0,
            Filter::And { filters } | Filter::Or { filters } => filters
                .iter()
                .map(Filter::max_variable_level)
                .max()
                .unwrap_or(0),
        }
    }
}

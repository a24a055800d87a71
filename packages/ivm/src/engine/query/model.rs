use super::filter::{Filter, FilterValue};
use crate::engine::types::{CollectionName, DataValue, EntityId, Path};
use crate::error::{IvmError, Result};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;

pub type QueryId = SmolStr;

const EXISTS_PREFIX: &str = "#exists/";
const ORDER_PREFIX: &str = "#order/";

/// Include inserted by the engine, never visible to listeners.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyntheticKey {
    /// Mirror of the n-th `exists` filter (depth-first order).
    Exists(usize),
    /// Relation backing a relational order attribute, keyed by its alias.
    Order(SmolStr),
}

/// Key of an include entry.
///
/// Serialized as a plain string: user aliases as-is, synthetic keys as
/// `#exists/<n>` or `#order/<alias>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum IncludeKey {
    User(SmolStr),
    Synthetic(SyntheticKey),
}

impl IncludeKey {
    pub fn user(alias: &str) -> Self {
        IncludeKey::User(SmolStr::new(alias))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, IncludeKey::User(_))
    }
}

impl fmt::Display for IncludeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncludeKey::User(alias) => f.write_str(alias),
            IncludeKey::Synthetic(SyntheticKey::Exists(n)) => write!(f, "{EXISTS_PREFIX}{n}"),
            IncludeKey::Synthetic(SyntheticKey::Order(alias)) => {
                write!(f, "{ORDER_PREFIX}{alias}")
            }
        }
    }
}

impl From<IncludeKey> for String {
    fn from(key: IncludeKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for IncludeKey {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        if let Some(n) = raw.strip_prefix(EXISTS_PREFIX) {
            return n
                .parse()
                .map(|n| IncludeKey::Synthetic(SyntheticKey::Exists(n)))
                .map_err(|_| format!("malformed include key `{raw}`"));
        }
        if let Some(alias) = raw.strip_prefix(ORDER_PREFIX) {
            return Ok(IncludeKey::Synthetic(SyntheticKey::Order(SmolStr::new(alias))));
        }
        Ok(IncludeKey::User(SmolStr::from(raw)))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    #[default]
    Many,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Include {
    pub subquery: Query,
    #[serde(default)]
    pub cardinality: Cardinality,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key. A relational clause reads `attribute` through the related
/// row: its first segment is the relation alias, the rest the attribute.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderClause {
    pub attribute: Path,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Box<Query>>,
}

impl OrderClause {
    pub fn relation_key(&self) -> Option<IncludeKey> {
        self.relation.as_ref()?;
        let alias = self.attribute.first()?;
        Some(IncludeKey::Synthetic(SyntheticKey::Order(alias.clone())))
    }
}

/// Pagination cursor: rows strictly after (or at, when inclusive) the
/// position given by the order values and id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Cursor {
    pub values: Vec<DataValue>,
    pub id: EntityId,
    #[serde(default)]
    pub inclusive: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub collection_name: CollectionName,
    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub include: BTreeMap<IncludeKey, Include>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<OrderClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Cursor>,
}

impl Query {
    pub fn new(collection: &str) -> Self {
        Self {
            collection_name: SmolStr::new(collection),
            filters: Vec::new(),
            include: BTreeMap::new(),
            order: Vec::new(),
            limit: None,
            after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, attribute: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(Filter::eq(attribute, value))
    }

    pub fn exists(self, subquery: Query) -> Self {
        self.filter(Filter::exists(subquery))
    }

    pub fn include_many(mut self, alias: &str, subquery: Query) -> Self {
        self.include.insert(
            IncludeKey::user(alias),
            Include {
                subquery,
                cardinality: Cardinality::Many,
            },
        );
        self
    }

    pub fn include_one(mut self, alias: &str, subquery: Query) -> Self {
        self.include.insert(
            IncludeKey::user(alias),
            Include {
                subquery,
                cardinality: Cardinality::One,
            },
        );
        self
    }

    pub fn order_by(mut self, attribute: &str, direction: Direction) -> Self {
        self.order.push(OrderClause {
            attribute: Path::new(attribute),
            direction,
            relation: None,
        });
        self
    }

    /// Order by `<alias>.<attribute>` of the single row `relation` returns.
    pub fn order_by_relation(mut self, attribute: &str, direction: Direction, relation: Query) -> Self {
        self.order.push(OrderClause {
            attribute: Path::new(attribute),
            direction,
            relation: Some(Box::new(relation)),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.after = Some(cursor);
        self
    }

    /// Identity key: blake3 over the canonical JSON form.
    pub fn canonical_id(&self) -> QueryId {
        let bytes = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        SmolStr::new(blake3::hash(&bytes).to_hex().as_str())
    }

    /// Needs more than its own collection to evaluate.
    pub fn is_relational(&self) -> bool {
        !self.include.is_empty()
            || self.filters.iter().any(Filter::has_exists)
            || self.order.iter().any(|o| o.relation.is_some())
    }

    pub fn has_relational_order(&self) -> bool {
        self.order.iter().any(|o| o.relation.is_some())
    }

    /// Copy that keeps only what decides membership and order.
    pub(crate) fn membership_probe(&self) -> Query {
        let mut probe = self.clone();
        probe
            .include
            .retain(|key, _| matches!(key, IncludeKey::Synthetic(SyntheticKey::Order(_))));
        probe
    }

    /// Reject shapes the engine cannot maintain.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        if self.collection_name.is_empty() {
            return Err(IvmError::InvalidQuery("collection name is empty".into()));
        }
        for filter in &self.filters {
            validate_filter(filter, depth)?;
        }
        for (key, include) in &self.include {
            if !key.is_user() {
                return Err(IvmError::InvalidQuery(format!(
                    "include key `{key}` is reserved"
                )));
            }
            include.subquery.validate_at(depth + 1)?;
        }
        for clause in &self.order {
            if let Some(relation) = &clause.relation {
                if clause.attribute.len() < 2 {
                    return Err(IvmError::InvalidQuery(format!(
                        "relational order attribute `{}` needs `<alias>.<attribute>`",
                        clause.attribute
                    )));
                }
                relation.validate_at(depth + 1)?;
            }
        }
        Ok(())
    }
}

fn validate_filter(filter: &Filter, depth: usize) -> Result<()> {
    match filter {
        Filter::Compare { attribute, value, .. } => {
            if attribute.is_empty() {
                return Err(IvmError::InvalidQuery("empty filter attribute".into()));
            }
            if let FilterValue::Variable(var) = value {
                if var.level == 0 || var.level > depth {
                    return Err(IvmError::InvalidQuery(format!(
                        "variable `$parent {}` on `{}` has no enclosing row at depth {depth}",
                        var.level, attribute
                    )));
                }
            }
            Ok(())
        }
        Filter::And { filters } | Filter::Or { filters } => {
            filters.iter().try_for_each(|f| validate_filter(f, depth))
        }
        Filter::Exists { subquery } => subquery.validate_at(depth + 1),
    }
}

//! Merging partial result sets into cached results.

use crate::engine::eval::{compare_rows, sort_rows};
use crate::engine::query::Query;
use crate::engine::types::{EntityId, FastMap, FastSet, SubResult, ViewEntity};
use smol_str::SmolStr;
use std::cmp::Ordering;

fn index_by_id(rows: &[ViewEntity]) -> FastMap<EntityId, usize> {
    rows.iter()
        .enumerate()
        .filter_map(|(i, row)| row.id().map(|id| (SmolStr::new(id), i)))
        .collect()
}

fn finish(rows: &mut Vec<ViewEntity>, query: &Query) {
    sort_rows(rows, &query.order);
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
}

/// Merge `additional` (rows carrying possibly partial includes) into
/// `existing`: matching rows merge recursively, the rest are appended, then
/// the list is re-sorted and truncated to the query's limit.
pub fn merge_results(existing: &mut Vec<ViewEntity>, additional: Vec<ViewEntity>, query: &Query) {
    let mut index = index_by_id(existing);
    for row in additional {
        let position = row.id().and_then(|id| index.get(id).copied());
        match position {
            Some(i) => merge_row(&mut existing[i], row, query),
            None => {
                if let Some(id) = row.id() {
                    index.insert(SmolStr::new(id), existing.len());
                }
                existing.push(row);
            }
        }
    }
    finish(existing, query);
}

fn merge_row(target: &mut ViewEntity, incoming: ViewEntity, query: &Query) {
    target.data.merge_partial(&incoming.data);
    for (key, sub) in incoming.subqueries {
        let Some(include) = query.include.get(&key) else {
            target.subqueries.insert(key, sub);
            continue;
        };
        let subquery = &include.subquery;
        let Some(current) = target.subqueries.get_mut(&key) else {
            target.subqueries.insert(key, sub);
            continue;
        };
        match (current, sub) {
            (SubResult::Many(rows), SubResult::Many(add)) => merge_results(rows, add, subquery),
            (SubResult::One(_), SubResult::One(None)) => {}
            (SubResult::One(slot), SubResult::One(Some(add))) => match slot {
                Some(held) if held.id() == add.id() => merge_row(held, *add, subquery),
                Some(held) => {
                    if compare_rows(&add, held, &subquery.order) == Ordering::Less {
                        *slot = Some(add);
                    }
                }
                None => *slot = Some(add),
            },
            (current, sub) => *current = sub,
        }
    }
}

/// Substitute rows by id with complete rows, append unknown ones, then
/// re-sort and truncate.
pub fn replace_rows(existing: &mut Vec<ViewEntity>, fresh: Vec<ViewEntity>, query: &Query) {
    let mut index = index_by_id(existing);
    for row in fresh {
        let position = row.id().and_then(|id| index.get(id).copied());
        match position {
            Some(i) => existing[i] = row,
            None => {
                if let Some(id) = row.id() {
                    index.insert(SmolStr::new(id), existing.len());
                }
                existing.push(row);
            }
        }
    }
    finish(existing, query);
}

/// Drop rows whose id is in `ids`; returns the ids actually removed.
pub fn remove_rows(existing: &mut Vec<ViewEntity>, ids: &FastSet<EntityId>) -> Vec<EntityId> {
    let mut removed = Vec::new();
    existing.retain(|row| match row.id() {
        Some(id) if ids.contains(id) => {
            removed.push(SmolStr::new(id));
            false
        }
        _ => true,
    });
    removed
}

pub fn find_row<'a>(rows: &'a [ViewEntity], id: &str) -> Option<&'a ViewEntity> {
    rows.iter().find(|row| row.id() == Some(id))
}

//! Pure query-tree transforms used to bind a changed entity to the root
//! query. None of these mutate their input; an unreachable include path is
//! reported as `None`, distinct from "matched and left unchanged".

use super::filter::Filter;
use super::model::{IncludeKey, Query};
use smol_str::SmolStr;

/// Root query restricted to rows from which `path` reaches the entity `id`.
///
/// The restriction is a chain of `exists` filters ending in `id = <id>`.
/// When `rewrite_includes` is set, the includes along `path` are narrowed the
/// same way, so the result carries only the branch leading to `id`.
pub fn bind_entity(
    query: &Query,
    path: &[IncludeKey],
    id: &str,
    rewrite_includes: bool,
) -> Option<Query> {
    let Some((head, rest)) = path.split_first() else {
        let mut bound = query.clone();
        bound.filters.push(Filter::id_eq(id));
        return Some(bound);
    };
    let include = query.include.get(head)?;
    let bound_child = bind_entity(&include.subquery, rest, id, rewrite_includes)?;

    let mut bound = query.clone();
    bound.filters.push(Filter::exists(bound_child.membership_probe()));
    if rewrite_includes {
        if let Some(slot) = bound.include.get_mut(head) {
            slot.subquery = bound_child;
        }
    }
    Some(bound)
}

/// Root query restricted to the given root ids.
pub fn constrain_to_ids(query: &Query, ids: &[SmolStr]) -> Query {
    let mut constrained = query.clone();
    constrained.filters.push(Filter::id_in(ids));
    constrained
}

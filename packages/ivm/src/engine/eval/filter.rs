use super::compare::compare_op;
use super::order::after_cursor_locally;
use crate::engine::query::{CompareOp, Filter, FilterValue, Query, Variable};
use crate::engine::types::{DataValue, Entity, Path};

/// Membership test using only the entity itself.
///
/// `exists` filters and comparisons against parent variables cannot be
/// decided here and count as satisfied, so a `false` result is exact while
/// a `true` result may still need confirming against the full query.
pub fn matches_locally(query: &Query, entity: &Entity) -> bool {
    filters_match_locally(&query.filters, entity) && after_cursor_locally(entity, query)
}

pub fn filters_match_locally(filters: &[Filter], entity: &Entity) -> bool {
    filters.iter().all(|f| filter_locally(f, entity))
}

fn filter_locally(filter: &Filter, entity: &Entity) -> bool {
    match filter {
        Filter::Compare {
            attribute,
            op,
            value: FilterValue::Literal(target),
        } => compare_op(*op, entity.resolve(attribute), target),
        Filter::Compare {
            value: FilterValue::Variable(_),
            ..
        }
        | Filter::Exists { .. } => true,
        Filter::And { filters } => filters.iter().all(|f| filter_locally(f, entity)),
        Filter::Or { filters } => filters.iter().any(|f| filter_locally(f, entity)),
    }
}

/// Value of a variable, looked up on the enclosing rows (innermost last).
pub fn resolve_variable<'a>(var: &Variable, parents: &'a [Entity]) -> Option<&'a DataValue> {
    let index = parents.len().checked_sub(var.level)?;
    parents.get(index)?.resolve(&var.path)
}

/// Evaluate one comparison with enclosing rows in scope.
pub fn compare_in_scope(
    attribute: &Path,
    op: CompareOp,
    value: &FilterValue,
    entity: &Entity,
    parents: &[Entity],
) -> bool {
    let target = match value {
        FilterValue::Literal(target) => target,
        FilterValue::Variable(var) => match resolve_variable(var, parents) {
            Some(target) => target,
            None => return false,
        },
    };
    compare_op(op, entity.resolve(attribute), target)
}

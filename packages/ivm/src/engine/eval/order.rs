use super::compare::compare_values;
use crate::engine::query::{Cursor, Direction, OrderClause, Query};
use crate::engine::types::{DataValue, Entity, ViewEntity};
use std::cmp::Ordering;

/// Sort value of `row` for `clause`; relational clauses read through the
/// row's synthetic order include.
pub fn order_value<'a>(row: &'a ViewEntity, clause: &OrderClause) -> Option<&'a DataValue> {
    match clause.relation_key() {
        None => row.data.resolve(&clause.attribute),
        Some(key) => row
            .subqueries
            .get(&key)?
            .rows()
            .first()?
            .data
            .resolve(&clause.attribute.tail()),
    }
}

fn directed(ord: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

/// Order clauses in turn, then id ascending as the final tiebreak.
pub fn compare_rows(a: &ViewEntity, b: &ViewEntity, order: &[OrderClause]) -> Ordering {
    for clause in order {
        let ord = directed(
            compare_values(order_value(a, clause), order_value(b, clause)),
            clause.direction,
        );
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id().cmp(&b.id())
}

pub fn sort_rows(rows: &mut [ViewEntity], order: &[OrderClause]) {
    rows.sort_by(|a, b| compare_rows(a, b, order));
}

fn past_cursor(values: &[Option<&DataValue>], id: Option<&str>, order: &[OrderClause], cursor: &Cursor) -> bool {
    for ((clause, value), target) in order.iter().zip(values).zip(&cursor.values) {
        let ord = directed(compare_values(*value, Some(target)), clause.direction);
        if ord != Ordering::Equal {
            return ord == Ordering::Greater;
        }
    }
    match id.cmp(&Some(cursor.id.as_str())) {
        Ordering::Greater => true,
        Ordering::Equal => cursor.inclusive,
        Ordering::Less => false,
    }
}

pub fn after_cursor(row: &ViewEntity, query: &Query) -> bool {
    let Some(cursor) = &query.after else {
        return true;
    };
    let values: Vec<_> = query.order.iter().map(|c| order_value(row, c)).collect();
    past_cursor(&values, row.id(), &query.order, cursor)
}

/// Cursor check without related rows; relational orderings are not
/// decidable here and pass.
pub fn after_cursor_locally(entity: &Entity, query: &Query) -> bool {
    let Some(cursor) = &query.after else {
        return true;
    };
    if query.has_relational_order() {
        return true;
    }
    let values: Vec<_> = query.order.iter().map(|c| entity.resolve(&c.attribute)).collect();
    past_cursor(&values, entity.id(), &query.order, cursor)
}

pub mod compare;
pub mod filter;
pub mod order;

pub use compare::{compare_op, compare_values, values_equal};
pub use filter::{compare_in_scope, filters_match_locally, matches_locally, resolve_variable};
pub use order::{after_cursor, after_cursor_locally, compare_rows, order_value, sort_rows};

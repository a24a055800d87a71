mod filter;
mod model;
mod prepare;
pub mod rewrite;

pub use filter::{CompareOp, Filter, FilterValue, Variable};
pub use model::{
    Cardinality, Cursor, Direction, Include, IncludeKey, OrderClause, Query, QueryId, SyntheticKey,
};
pub use prepare::prepare;

use crate::engine::query::QueryId;
use thiserror::Error;

pub type Result<T, E = IvmError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum IvmError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Reading from or committing to the entity store failed.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("query execution failed: {0:#}")]
    Fetch(anyhow::Error),

    /// A query node path no longer leads to an include of its root query.
    #[error("include path `{path}` is not reachable from query {query_id}")]
    UnreachablePath { query_id: QueryId, path: String },
}

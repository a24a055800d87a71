pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod logging;
pub mod store;

// Re-export commonly used types for convenience
pub use config::{load_config, IvmConfig, LimitStrategy};
pub use engine::query::{
    Cardinality, CompareOp, Cursor, Direction, Filter, FilterValue, Query, QueryId,
};
pub use engine::types::{ChangeSet, CollectionChanges, DataValue, Entity, Path, SubResult, ViewEntity};
pub use engine::{Ivm, QueryUpdate, Subscription, UpdateKind};
pub use error::{IvmError, Result};
pub use exec::{MemoryExecutor, QueryExecutor};
pub use store::{ApplyOptions, EntityStore, MemoryStore, OverlayStore};

//! Entity storage seam.

mod memory;
mod overlay;

pub use memory::MemoryStore;
pub use overlay::OverlayStore;

use crate::engine::types::{ChangeSet, Entity};
use async_trait::async_trait;

/// Hooks the store may run on writes. The engine commits its own change
/// sets with both disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    pub check_write_permissions: bool,
    pub validate: bool,
}

impl ApplyOptions {
    pub fn trusted() -> Self {
        Self {
            check_write_permissions: false,
            validate: false,
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, collection: &str, id: &str) -> anyhow::Result<Option<Entity>>;

    /// Every entity of `collection`.
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Entity>>;

    /// Apply a change set atomically.
    async fn apply_changes(&self, changes: &ChangeSet, options: ApplyOptions) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

mod change_set;
mod entity;
mod maps;
mod path;
mod value;
mod view_entity;

pub use change_set::{ChangeKind, ChangeSet, CollectionChanges};
pub use entity::{CollectionName, Entity, EntityId, ID_FIELD};
pub use maps::{FastIndexMap, FastIndexSet, FastMap, FastSet, FxBuild};
pub use path::Path;
pub use value::DataValue;
pub(crate) use value::NULL_VALUE;
pub use view_entity::{SubResult, ViewEntity};

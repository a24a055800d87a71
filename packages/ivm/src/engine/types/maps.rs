use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

pub type FxBuild = BuildHasherDefault<FxHasher>;
pub type FastMap<K, V> = std::collections::HashMap<K, V, FxBuild>;
pub type FastSet<K> = std::collections::HashSet<K, FxBuild>;

/// Insertion-ordered map; used wherever iteration order is observable
/// (change sets, listener registration order).
pub type FastIndexMap<K, V> = IndexMap<K, V, FxBuild>;
pub type FastIndexSet<K> = IndexSet<K, FxBuild>;

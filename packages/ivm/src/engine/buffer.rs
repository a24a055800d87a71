use crate::engine::types::ChangeSet;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Buffers {
    active: ChangeSet,
    inactive: ChangeSet,
}

/// Double buffer between writers and the maintenance pass.
///
/// Writers always land in `active`. A pass folds `active` into `inactive`
/// and works from that; `inactive` is cleared only once the pass has
/// committed, so a failed pass leaves its changes in place for the next one.
#[derive(Debug, Default)]
pub struct ChangeBuffer {
    inner: Mutex<Buffers>,
}

impl ChangeBuffer {
    pub fn write(&self, changes: ChangeSet) {
        self.inner.lock().active.merge(changes);
    }

    /// Swap buffers and return the change set the pass should process.
    pub fn begin_drain(&self) -> ChangeSet {
        let mut buffers = self.inner.lock();
        let active = std::mem::take(&mut buffers.active);
        buffers.inactive.merge(active);
        buffers.inactive.clone()
    }

    /// The pass committed; drop what it processed.
    pub fn complete_drain(&self) {
        self.inner.lock().inactive = ChangeSet::default();
    }

    pub fn is_empty(&self) -> bool {
        let buffers = self.inner.lock();
        buffers.active.is_empty() && buffers.inactive.is_empty()
    }

    pub fn clear(&self) {
        let mut buffers = self.inner.lock();
        buffers.active = ChangeSet::default();
        buffers.inactive = ChangeSet::default();
    }
}

#[cfg(test)]
mod buffer_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_writes_during_pass_wait_for_next_pass() {
        let buffer = ChangeBuffer::default();
        buffer.write(ChangeSet::new().insert("users", json!({ "id": "1" })));

        let first = buffer.begin_drain();
        assert_eq!(first.total_changes(), 1);

        buffer.write(ChangeSet::new().insert("users", json!({ "id": "2" })));
        buffer.complete_drain();
        assert!(!buffer.is_empty());

        let second = buffer.begin_drain();
        let users = second.collection("users").unwrap();
        assert!(users.sets.contains_key("2"));
        assert!(!users.sets.contains_key("1"));
    }

    #[test]
    fn test_failed_pass_keeps_changes() {
        let buffer = ChangeBuffer::default();
        buffer.write(ChangeSet::new().delete("users", "1"));
        let _ = buffer.begin_drain();
        buffer.write(ChangeSet::new().insert("users", json!({ "id": "1", "v": 2 })));

        let retry = buffer.begin_drain();
        let users = retry.collection("users").unwrap();
        assert!(users.deletes.contains("1"));
        assert!(users.sets.contains_key("1"));

        buffer.complete_drain();
        assert!(buffer.is_empty());
    }
}

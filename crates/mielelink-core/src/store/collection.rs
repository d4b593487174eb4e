// ── Device collection ──
//
// Lock-free concurrent storage with O(1) lookups.

use std::sync::Arc;

use dashmap::DashMap;

use super::record::DeviceRecord;

/// All device records of the run, keyed by API id.
///
/// Records are created on first sighting and never removed.
pub struct DeviceStore {
    by_id: DashMap<String, Arc<DeviceRecord>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
        }
    }

    /// Insert a record unless one exists. Returns `true` if it was new.
    pub(crate) fn insert_new(&self, record: DeviceRecord) -> bool {
        match self.by_id.entry(record.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(record));
                true
            }
        }
    }

    /// Mutate a record in place. `None` if the id is unknown.
    pub(crate) fn modify<R>(&self, id: &str, f: impl FnOnce(&mut DeviceRecord) -> R) -> Option<R> {
        let mut entry = self.by_id.get_mut(id)?;
        Some(f(Arc::make_mut(entry.value_mut())))
    }

    pub fn get(&self, id: &str) -> Option<Arc<DeviceRecord>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Ids of every known device, sorted.
    pub fn known_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mielelink_api::models::Device;
    use tokio::time::Instant;

    use super::*;

    fn record(id: &str) -> DeviceRecord {
        DeviceRecord::new(id, &Device::default(), Instant::now())
    }

    #[test]
    fn insert_is_first_sighting_only() {
        let store = DeviceStore::new();
        assert!(store.insert_new(record("B")));
        assert!(store.insert_new(record("A")));
        assert!(!store.insert_new(record("A")));
        assert_eq!(store.known_ids(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn modify_replaces_the_shared_record() {
        let store = DeviceStore::new();
        store.insert_new(record("A"));
        let before = store.get("A").unwrap();

        store.modify("A", |r| r.last_action_result = Some("Okay!".into()));

        assert_eq!(
            store.get("A").unwrap().last_action_result.as_deref(),
            Some("Okay!")
        );
        assert!(before.last_action_result.is_none());
        assert!(store.modify("missing", |_| ()).is_none());
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::location::{LocationPatch, LocationRecord, SlotId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A push subscription to one slot. `initial` carries the value at
/// subscription time (or None if the slot was never written); `events`
/// delivers every subsequent write.
pub struct SlotSubscription {
    pub initial: Option<LocationRecord>,
    pub events: broadcast::Receiver<LocationRecord>,
}

/// Push-capable store of location slots. Writes are merges, records are
/// never hard-deleted, and there is no locking: concurrent writers to one
/// slot are last-write-wins. Kept as a trait so the publisher and
/// subscriber can be exercised against a failing fake.
pub trait LocationStore: Send + Sync + 'static {
    /// Merges `patch` into the slot, creating the record if absent, and
    /// returns the record as written.
    fn merge(&self, slot: &SlotId, patch: LocationPatch) -> Result<LocationRecord, StoreError>;

    fn read(&self, slot: &SlotId) -> Result<Option<LocationRecord>, StoreError>;

    fn subscribe(&self, slot: &SlotId) -> SlotSubscription;

    /// Order slots whose record currently reports an active session.
    fn active_order_slots(&self) -> Vec<(String, LocationRecord)>;
}

struct Slot {
    record: Option<LocationRecord>,
    events: broadcast::Sender<LocationRecord>,
}

/// In-memory store implementation backed by per-slot broadcast channels.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    event_buffer: usize,
}

impl MemoryStore {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            slots: DashMap::new(),
            event_buffer,
        }
    }

    fn with_slot<T>(&self, slot: &SlotId, f: impl FnOnce(&mut Slot) -> T) -> T {
        let mut entry = self.slots.entry(slot.path()).or_insert_with(|| {
            let (events, _unused_rx) = broadcast::channel(self.event_buffer);
            Slot {
                record: None,
                events,
            }
        });
        f(entry.value_mut())
    }
}

impl LocationStore for MemoryStore {
    fn merge(&self, slot: &SlotId, patch: LocationPatch) -> Result<LocationRecord, StoreError> {
        let record = self.with_slot(slot, |entry| {
            let record = entry.record.get_or_insert_with(LocationRecord::default);
            patch.apply_to(record);
            let record = record.clone();
            // Lagging receivers miss updates; a fresher write lands within
            // the next tick anyway.
            let _ = entry.events.send(record.clone());
            record
        });
        Ok(record)
    }

    fn read(&self, slot: &SlotId) -> Result<Option<LocationRecord>, StoreError> {
        Ok(self
            .slots
            .get(&slot.path())
            .and_then(|entry| entry.record.clone()))
    }

    fn subscribe(&self, slot: &SlotId) -> SlotSubscription {
        self.with_slot(slot, |entry| SlotSubscription {
            initial: entry.record.clone(),
            events: entry.events.subscribe(),
        })
    }

    fn active_order_slots(&self) -> Vec<(String, LocationRecord)> {
        self.slots
            .iter()
            .filter_map(|entry| {
                let order_id = entry.key().strip_prefix("locations/")?;
                let record = entry.value().record.as_ref()?;
                if record.is_tracking {
                    Some((order_id.to_string(), record.clone()))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Process-wide handle to the location store, injected into publishers and
/// subscribers. Cheap to clone.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<dyn LocationStore>,
}

impl StoreClient {
    pub fn in_memory(event_buffer: usize) -> Self {
        Self::init(Arc::new(MemoryStore::new(event_buffer)))
    }

    pub fn init(inner: Arc<dyn LocationStore>) -> Self {
        Self { inner }
    }

    pub fn merge(&self, slot: &SlotId, patch: LocationPatch) -> Result<LocationRecord, StoreError> {
        self.inner.merge(slot, patch)
    }

    pub fn read(&self, slot: &SlotId) -> Result<Option<LocationRecord>, StoreError> {
        self.inner.read(slot)
    }

    pub fn subscribe(&self, slot: &SlotId) -> SlotSubscription {
        self.inner.subscribe(slot)
    }

    pub fn active_order_slots(&self) -> Vec<(String, LocationRecord)> {
        self.inner.active_order_slots()
    }

    /// Write passthrough used by the publisher on every fix. Failures are
    /// logged and skipped; the next scheduled fix supersedes the lost one.
    pub fn merge_logged(&self, slot: &SlotId, patch: LocationPatch) -> Option<LocationRecord> {
        match self.merge(slot, patch) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(slot = %slot, error = %err, "location write failed; skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location::Coordinates;

    fn store() -> StoreClient {
        StoreClient::in_memory(16)
    }

    #[test]
    fn merge_creates_record_with_inactive_default() {
        let store = store();
        let coords = Coordinates {
            latitude: 51.5,
            longitude: -0.09,
        };
        store
            .merge(
                &SlotId::Public,
                LocationPatch::position(coords, 1_000).driver_name(Some("Test".to_string())),
            )
            .unwrap();

        let record = store.read(&SlotId::Public).unwrap().unwrap();
        assert_eq!(record.latitude, 51.5);
        assert_eq!(record.longitude, -0.09);
        assert!(!record.is_tracking);
        assert_eq!(record.driver_name.as_deref(), Some("Test"));
    }

    #[test]
    fn merge_preserves_unspecified_fields() {
        let store = store();
        let slot = SlotId::Order("order-1".to_string());
        let coords = Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        };
        store
            .merge(&slot, LocationPatch::position(coords, 100).tracking(true))
            .unwrap();

        // A tracking-only patch must not clobber the position.
        store
            .merge(
                &slot,
                LocationPatch {
                    is_tracking: Some(false),
                    ..LocationPatch::default()
                },
            )
            .unwrap();

        let record = store.read(&slot).unwrap().unwrap();
        assert_eq!(record.latitude, 1.0);
        assert_eq!(record.longitude, 2.0);
        assert_eq!(record.timestamp, 100);
        assert!(!record.is_tracking);
    }

    #[tokio::test]
    async fn subscription_sees_initial_value_and_later_writes() {
        let store = store();
        let coords = Coordinates {
            latitude: 1.0,
            longitude: 1.0,
        };
        store
            .merge(&SlotId::Public, LocationPatch::position(coords, 1))
            .unwrap();

        let mut sub = store.subscribe(&SlotId::Public);
        assert_eq!(sub.initial.as_ref().unwrap().timestamp, 1);

        store
            .merge(&SlotId::Public, LocationPatch::position(coords, 2))
            .unwrap();
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.timestamp, 2);
    }

    #[test]
    fn subscription_to_unwritten_slot_starts_empty() {
        let store = store();
        let sub = store.subscribe(&SlotId::Order("missing".to_string()));
        assert!(sub.initial.is_none());
    }

    #[test]
    fn active_order_slots_excludes_inactive_and_public() {
        let store = store();
        let coords = Coordinates {
            latitude: 0.0,
            longitude: 0.0,
        };
        store
            .merge(
                &SlotId::Public,
                LocationPatch::position(coords, 1).tracking(true),
            )
            .unwrap();
        store
            .merge(
                &SlotId::Order("a".to_string()),
                LocationPatch::position(coords, 1).tracking(true),
            )
            .unwrap();
        store
            .merge(
                &SlotId::Order("b".to_string()),
                LocationPatch::position(coords, 1).tracking(false),
            )
            .unwrap();

        let active = store.active_order_slots();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, "a");
    }
}

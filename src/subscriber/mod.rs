use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::models::location::{LocationRecord, SlotId};
use crate::publisher::scheduler::Scheduler;
use crate::store::StoreClient;

/// What a viewer sees: the reconciled current location, whether a session
/// is live, and the subscription status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedView {
    pub location: Option<LocationRecord>,
    pub is_active: bool,
    pub loading: bool,
    pub last_error: Option<String>,
}

/// Merges the public slot and an optional order slot into one coherent
/// view. The public slot has static priority: while it reports an active
/// session it is authoritative no matter which record is newer, so two
/// push events arriving in either order produce the same answer. An
/// inactive record is still surfaced so the last known position stays
/// visible with a "stopped" indication.
pub fn reconcile(
    public: Option<&LocationRecord>,
    order: Option<&LocationRecord>,
) -> (Option<LocationRecord>, bool) {
    match (public, order) {
        (Some(record), _) if record.is_tracking => (Some(record.clone()), true),
        (_, Some(record)) if record.is_tracking => (Some(record.clone()), true),
        (Some(record), _) => (Some(record.clone()), false),
        (_, Some(record)) => (Some(record.clone()), false),
        (None, None) => (None, false),
    }
}

/// The store gives no ordering guarantee across retried writes, so a
/// record older than the one already held for the same slot is dropped.
fn accept(current: &mut Option<LocationRecord>, incoming: LocationRecord) -> bool {
    match current {
        Some(held) if incoming.timestamp < held.timestamp => {
            debug!(
                held = held.timestamp,
                incoming = incoming.timestamp,
                "dropping out-of-order slot update"
            );
            false
        }
        _ => {
            *current = Some(incoming);
            true
        }
    }
}

/// Viewer-side subscription to the public slot and, when an order id is
/// given, that order's slot. Exposes the reconciled view through a watch
/// channel; closing cancels both subscriptions.
pub struct LocationSubscriber {
    view_rx: watch::Receiver<TrackedView>,
    task: Scheduler,
}

impl LocationSubscriber {
    pub fn subscribe(store: &StoreClient, order_id: Option<String>) -> Self {
        let public_sub = store.subscribe(&SlotId::Public);
        let order_sub = order_id.map(|id| store.subscribe(&SlotId::Order(id)));

        let mut public = public_sub.initial;
        let mut order = order_sub.as_ref().and_then(|sub| sub.initial.clone());

        let (location, is_active) = reconcile(public.as_ref(), order.as_ref());
        let (view_tx, view_rx) = watch::channel(TrackedView {
            location,
            is_active,
            loading: false,
            last_error: None,
        });

        let mut public_events = public_sub.events;
        let mut order_events = order_sub.map(|sub| sub.events);

        let task = Scheduler::spawn(move |mut shutdown| async move {
            let mut public_open = true;
            let mut order_open = order_events.is_some();

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = public_events.recv(), if public_open => {
                        match event {
                            Ok(record) => {
                                if accept(&mut public, record) {
                                    publish(&view_tx, &public, &order, None);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => {
                                public_open = false;
                                publish(&view_tx, &public, &order,
                                    Some("location feed closed".to_string()));
                            }
                        }
                    },
                    event = recv_order(&mut order_events), if order_open => {
                        match event {
                            Ok(record) => {
                                if accept(&mut order, record) {
                                    publish(&view_tx, &public, &order, None);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => order_open = false,
                        }
                    },
                }
            }
        });

        Self { view_rx, task }
    }

    pub fn view(&self) -> TrackedView {
        self.view_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TrackedView> {
        self.view_rx.clone()
    }

    /// Cancels both push subscriptions. Closing when the order
    /// subscription was never opened is fine.
    pub async fn close(self) {
        self.task.cancel().await;
    }
}

async fn recv_order(
    events: &mut Option<broadcast::Receiver<LocationRecord>>,
) -> Result<LocationRecord, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => Err(broadcast::error::RecvError::Closed),
    }
}

fn publish(
    view_tx: &watch::Sender<TrackedView>,
    public: &Option<LocationRecord>,
    order: &Option<LocationRecord>,
    last_error: Option<String>,
) {
    let (location, is_active) = reconcile(public.as_ref(), order.as_ref());
    view_tx.send_replace(TrackedView {
        location,
        is_active,
        loading: false,
        last_error,
    });
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, Duration};

    use super::*;
    use crate::models::location::{Coordinates, LocationPatch};

    fn record(latitude: f64, longitude: f64, timestamp: i64, is_tracking: bool) -> LocationRecord {
        LocationRecord {
            latitude,
            longitude,
            timestamp,
            is_tracking,
            driver_name: None,
        }
    }

    #[test]
    fn public_slot_wins_even_when_order_slot_is_newer() {
        let public = record(1.0, 1.0, 100, true);
        let order = record(2.0, 2.0, 200, true);

        let (location, is_active) = reconcile(Some(&public), Some(&order));
        let location = location.unwrap();
        assert!(is_active);
        assert_eq!(location.latitude, 1.0);
        assert_eq!(location.timestamp, 100);
    }

    #[test]
    fn order_slot_surfaces_only_when_public_is_inactive() {
        let public = record(1.0, 1.0, 300, false);
        let order = record(2.0, 2.0, 200, true);

        let (location, is_active) = reconcile(Some(&public), Some(&order));
        assert!(is_active);
        assert_eq!(location.unwrap().latitude, 2.0);
    }

    #[test]
    fn stopped_location_is_retained_for_display() {
        let public = record(1.0, 1.0, 100, false);

        let (location, is_active) = reconcile(Some(&public), None);
        assert!(!is_active);
        assert_eq!(location.unwrap().latitude, 1.0);
    }

    #[test]
    fn no_records_means_no_location() {
        let (location, is_active) = reconcile(None, None);
        assert!(location.is_none());
        assert!(!is_active);
    }

    #[test]
    fn out_of_order_write_to_same_slot_is_dropped() {
        let mut held = Some(record(1.0, 1.0, 200, true));
        assert!(!accept(&mut held, record(2.0, 2.0, 100, true)));
        assert_eq!(held.as_ref().unwrap().timestamp, 200);

        assert!(accept(&mut held, record(3.0, 3.0, 300, true)));
        assert_eq!(held.as_ref().unwrap().timestamp, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_follows_public_writes() {
        let store = StoreClient::in_memory(16);
        let subscriber = LocationSubscriber::subscribe(&store, None);
        assert!(subscriber.view().location.is_none());
        assert!(!subscriber.view().loading);

        store
            .merge(
                &SlotId::Public,
                LocationPatch::position(
                    Coordinates {
                        latitude: 5.0,
                        longitude: 6.0,
                    },
                    1_000,
                )
                .tracking(true),
            )
            .unwrap();
        sleep(Duration::from_millis(20)).await;

        let view = subscriber.view();
        assert!(view.is_active);
        assert_eq!(view.location.unwrap().latitude, 5.0);

        subscriber.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn order_subscription_yields_to_active_public_session() {
        let store = StoreClient::in_memory(16);
        let order_slot = SlotId::Order("order-7".to_string());
        store
            .merge(
                &order_slot,
                LocationPatch::position(
                    Coordinates {
                        latitude: 2.0,
                        longitude: 2.0,
                    },
                    200,
                )
                .tracking(true),
            )
            .unwrap();

        let subscriber = LocationSubscriber::subscribe(&store, Some("order-7".to_string()));
        assert_eq!(subscriber.view().location.as_ref().unwrap().latitude, 2.0);

        // An older public record still overrides the order slot while it
        // reports an active session.
        store
            .merge(
                &SlotId::Public,
                LocationPatch::position(
                    Coordinates {
                        latitude: 1.0,
                        longitude: 1.0,
                    },
                    100,
                )
                .tracking(true),
            )
            .unwrap();
        sleep(Duration::from_millis(20)).await;

        let view = subscriber.view();
        assert!(view.is_active);
        assert_eq!(view.location.unwrap().latitude, 1.0);

        subscriber.close().await;
    }
}

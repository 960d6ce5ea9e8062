use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::Config;
use crate::models::location::SlotId;
use crate::observability::metrics::Metrics;
use crate::platform::geolocation::ChannelGeolocation;
use crate::platform::wake_lock::UnsupportedWakeLock;
use crate::publisher::scheduler::{IntervalTicks, TickStrategy};
use crate::publisher::{LocationPublisher, PublisherSettings};
use crate::store::StoreClient;

pub type AppPublisher = LocationPublisher<ChannelGeolocation, UnsupportedWakeLock>;

pub struct AppState {
    pub store: StoreClient,
    pub geolocation: Arc<ChannelGeolocation>,
    pub public_publisher: Arc<AppPublisher>,
    pub order_publishers: DashMap<String, Arc<AppPublisher>>,
    pub metrics: Metrics,
    wake: Arc<UnsupportedWakeLock>,
    ticks: Arc<dyn TickStrategy>,
    settings: PublisherSettings,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let store = StoreClient::in_memory(config.event_buffer_size);
        let geolocation = Arc::new(ChannelGeolocation::new(config.event_buffer_size));
        let wake = Arc::new(UnsupportedWakeLock);
        let ticks: Arc<dyn TickStrategy> = Arc::new(IntervalTicks);
        let metrics = Metrics::new();
        let settings = PublisherSettings {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            fix_timeout: Duration::from_millis(config.fix_timeout_ms),
        };

        let public_publisher = Arc::new(LocationPublisher::new(
            store.clone(),
            geolocation.clone(),
            wake.clone(),
            ticks.clone(),
            SlotId::Public,
            settings,
            metrics.clone(),
        ));

        Self {
            store,
            geolocation,
            public_publisher,
            order_publishers: DashMap::new(),
            metrics,
            wake,
            ticks,
            settings,
        }
    }

    /// Publisher for an order-specific session, created on first use and
    /// retained for the life of the process, like the slot it writes
    /// (records are never deleted). An idle publisher is a handful of
    /// cloned handles; evicting on stop would race a concurrent start.
    pub fn order_publisher(&self, order_id: &str) -> Arc<AppPublisher> {
        self.order_publishers
            .entry(order_id.to_string())
            .or_insert_with(|| {
                Arc::new(LocationPublisher::new(
                    self.store.clone(),
                    self.geolocation.clone(),
                    self.wake.clone(),
                    self.ticks.clone(),
                    SlotId::Order(order_id.to_string()),
                    self.settings,
                    self.metrics.clone(),
                ))
            })
            .clone()
    }
}

use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_updates_total: IntCounterVec,
    pub active_tracking_sessions: IntGauge,
    pub position_fix_latency_seconds: HistogramVec,
    pub location_subscribers: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Location writes by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let active_tracking_sessions = IntGauge::new(
            "active_tracking_sessions",
            "Currently active publishing sessions",
        )
        .expect("valid active_tracking_sessions metric");

        let position_fix_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "position_fix_latency_seconds",
                "Latency of position fix acquisition in seconds",
            ),
            &["outcome"],
        )
        .expect("valid position_fix_latency_seconds metric");

        let location_subscribers = IntGauge::new(
            "location_subscribers",
            "Connected location feed subscribers",
        )
        .expect("valid location_subscribers metric");

        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(active_tracking_sessions.clone()))
            .expect("register active_tracking_sessions");
        registry
            .register(Box::new(position_fix_latency_seconds.clone()))
            .expect("register position_fix_latency_seconds");
        registry
            .register(Box::new(location_subscribers.clone()))
            .expect("register location_subscribers");

        Self {
            registry,
            location_updates_total,
            active_tracking_sessions,
            position_fix_latency_seconds,
            location_subscribers,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

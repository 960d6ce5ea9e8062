use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::models::location::Coordinates;

#[derive(Debug, Clone, Error)]
pub enum GeoError {
    #[error("geolocation permission denied")]
    PermissionDenied,

    #[error("position fix timed out")]
    Timeout,

    #[error("geolocation unavailable: {0}")]
    Unavailable(String),
}

/// Options for a position fix, mirroring the platform geolocation API.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest {
    pub high_accuracy: bool,
    /// How long a single fix attempt may take before it fails soft.
    pub timeout: Duration,
    /// Oldest acceptable cached fix; zero means only a fix produced after
    /// the request counts.
    pub maximum_age: Duration,
}

/// A continuous position watch. Dropping it cancels the watch.
pub struct PositionWatch {
    rx: mpsc::Receiver<Result<Coordinates, GeoError>>,
}

impl PositionWatch {
    pub fn new(rx: mpsc::Receiver<Result<Coordinates, GeoError>>) -> Self {
        Self { rx }
    }

    /// None means the watch ended on the provider side.
    pub async fn recv(&mut self) -> Option<Result<Coordinates, GeoError>> {
        self.rx.recv().await
    }
}

/// Source of device position fixes. The production implementation is fed
/// over HTTP by the driver's device; tests inject deterministic fakes.
pub trait GeolocationProvider: Send + Sync + 'static {
    fn current_position(
        &self,
        request: FixRequest,
    ) -> impl Future<Output = Result<Coordinates, GeoError>> + Send;

    fn watch_position(&self, request: FixRequest) -> PositionWatch;
}

struct TimedFix {
    coords: Coordinates,
    at: Instant,
}

/// Geolocation provider backed by fixes the driver device pushes in.
/// `current_position` serves the latest fix if it is fresh enough for the
/// request, otherwise waits up to the request timeout for the next one.
pub struct ChannelGeolocation {
    latest: watch::Sender<Option<TimedFix>>,
    feed: broadcast::Sender<Coordinates>,
}

impl ChannelGeolocation {
    pub fn new(feed_buffer: usize) -> Self {
        let (latest, _unused_rx) = watch::channel(None);
        let (feed, _unused_feed_rx) = broadcast::channel(feed_buffer);
        Self { latest, feed }
    }

    pub fn push_fix(&self, coords: Coordinates) {
        self.latest.send_replace(Some(TimedFix {
            coords,
            at: Instant::now(),
        }));
        let _ = self.feed.send(coords);
    }
}

impl GeolocationProvider for ChannelGeolocation {
    async fn current_position(&self, request: FixRequest) -> Result<Coordinates, GeoError> {
        if request.maximum_age > Duration::ZERO {
            let fresh = self
                .latest
                .borrow()
                .as_ref()
                .filter(|fix| fix.at.elapsed() <= request.maximum_age)
                .map(|fix| fix.coords);
            if let Some(coords) = fresh {
                return Ok(coords);
            }
        }

        let mut rx = self.feed.subscribe();
        match tokio::time::timeout(request.timeout, rx.recv()).await {
            Ok(Ok(coords)) => Ok(coords),
            Ok(Err(_closed)) => Err(GeoError::Unavailable("position feed closed".to_string())),
            Err(_elapsed) => Err(GeoError::Timeout),
        }
    }

    fn watch_position(&self, _request: FixRequest) -> PositionWatch {
        let mut feed = self.feed.subscribe();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    event = feed.recv() => match event {
                        Ok(coords) => {
                            if tx.send(Ok(coords)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        PositionWatch::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout_ms: u64, max_age_ms: u64) -> FixRequest {
        FixRequest {
            high_accuracy: true,
            timeout: Duration::from_millis(timeout_ms),
            maximum_age: Duration::from_millis(max_age_ms),
        }
    }

    fn coords(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates {
            latitude,
            longitude,
        }
    }

    #[tokio::test]
    async fn fresh_fix_is_served_without_waiting() {
        let geo = ChannelGeolocation::new(16);
        geo.push_fix(coords(51.5, -0.09));

        let fix = geo.current_position(request(1_000, 5_000)).await.unwrap();
        assert_eq!(fix.latitude, 51.5);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_times_out() {
        let geo = ChannelGeolocation::new(16);
        let result = geo.current_position(request(100, 100)).await;
        assert!(matches!(result, Err(GeoError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fix_is_not_served() {
        let geo = ChannelGeolocation::new(16);
        geo.push_fix(coords(1.0, 1.0));
        tokio::time::advance(Duration::from_secs(10)).await;

        let result = geo.current_position(request(100, 1_000)).await;
        assert!(matches!(result, Err(GeoError::Timeout)));
    }

    #[tokio::test]
    async fn watch_delivers_pushed_fixes_until_dropped() {
        let geo = ChannelGeolocation::new(16);
        let mut watch = geo.watch_position(request(1_000, 0));

        geo.push_fix(coords(2.0, 3.0));
        let event = watch.recv().await.unwrap().unwrap();
        assert_eq!(event.longitude, 3.0);
    }
}

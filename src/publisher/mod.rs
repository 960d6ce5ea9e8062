pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::location::{
    now_ms, Coordinates, LocationPatch, SlotId, DEFAULT_DRIVER_NAME,
};
use crate::observability::metrics::Metrics;
use crate::platform::geolocation::{FixRequest, GeoError, GeolocationProvider, PositionWatch};
use crate::platform::wake_lock::WakeLockProvider;
use crate::publisher::scheduler::{Scheduler, TickStrategy};
use crate::store::{StoreClient, StoreError};

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("geolocation permission denied")]
    PermissionDenied,

    #[error("could not acquire an initial position: {0}")]
    InitialFix(#[source] GeoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of each teardown step. Steps run unconditionally; one failing
/// does not skip the others.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    /// False when there was no session to stop; that is still success.
    pub was_active: bool,
    pub scheduler_stopped: bool,
    /// The wake-holder task wound down. True whether or not a lock was
    /// ever granted; an unsupported platform still gets a holder.
    pub wake_holder_stopped: bool,
    pub slot_marked_inactive: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PublisherSettings {
    /// Cadence of the redundant fixed-interval fix.
    pub tick_interval: Duration,
    /// Deadline for the initial high-accuracy fix.
    pub fix_timeout: Duration,
}

struct Session {
    id: Uuid,
    scheduler: Scheduler,
    wake_holder: Scheduler,
}

/// Acquires this device's position repeatedly and pushes it to the store:
/// one immediate fix at start, then a continuous position watch plus a
/// fixed-interval tick, each independently writing, so viewers see an
/// update at least once per tick interval. Browsers still throttle
/// backgrounded sessions; the redundancy is best effort, not a guarantee.
pub struct LocationPublisher<G, W> {
    store: StoreClient,
    geo: Arc<G>,
    wake: Arc<W>,
    ticks: Arc<dyn TickStrategy>,
    slot: SlotId,
    settings: PublisherSettings,
    metrics: Metrics,
    session: Mutex<Option<Session>>,
}

impl<G, W> LocationPublisher<G, W>
where
    G: GeolocationProvider,
    W: WakeLockProvider,
{
    pub fn new(
        store: StoreClient,
        geo: Arc<G>,
        wake: Arc<W>,
        ticks: Arc<dyn TickStrategy>,
        slot: SlotId,
        settings: PublisherSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            geo,
            wake,
            ticks,
            slot,
            settings,
            metrics,
            session: Mutex::new(None),
        }
    }

    pub fn slot(&self) -> &SlotId {
        &self.slot
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Starts a publishing session. A session already running is fully torn
    /// down first, so two consecutive starts never leave duplicate timers
    /// or watches behind. Fails without writing anything if no initial
    /// position can be acquired.
    pub async fn start(&self, driver_name: Option<String>) -> Result<(), PublisherError> {
        let mut session = self.session.lock().await;
        let superseded = if let Some(previous) = session.take() {
            info!(session_id = %previous.id, slot = %self.slot, "superseding active session");
            previous.scheduler.cancel().await;
            previous.wake_holder.cancel().await;
            self.metrics.active_tracking_sessions.dec();
            true
        } else {
            false
        };

        let initial = match self
            .acquire_fix(FixRequest {
                high_accuracy: true,
                timeout: self.settings.fix_timeout,
                maximum_age: self.settings.fix_timeout,
            })
            .await
        {
            Ok(coords) => coords,
            Err(err) => {
                // The superseded session wrote isTracking=true; the slot
                // must not keep advertising a session that no longer runs.
                if superseded {
                    self.mark_slot_inactive();
                }
                return Err(match err {
                    GeoError::PermissionDenied => PublisherError::PermissionDenied,
                    other => PublisherError::InitialFix(other),
                });
            }
        };

        let name = driver_name.unwrap_or_else(|| DEFAULT_DRIVER_NAME.to_string());
        let initial_patch = LocationPatch::position(initial, now_ms())
            .tracking(true)
            .driver_name(Some(name.clone()));
        if let Err(err) = self.store.merge(&self.slot, initial_patch) {
            if superseded {
                self.mark_slot_inactive();
            }
            return Err(err.into());
        }
        self.metrics
            .location_updates_total
            .with_label_values(&["success"])
            .inc();

        let wake_holder = Scheduler::spawn({
            let wake = self.wake.clone();
            move |shutdown| hold_wake_lock(wake, shutdown)
        });

        let ticks = self.ticks.ticks(self.settings.tick_interval);
        let position_watch = self.geo.watch_position(FixRequest {
            high_accuracy: true,
            timeout: self.settings.fix_timeout,
            maximum_age: Duration::ZERO,
        });
        let scheduler = Scheduler::spawn({
            let ctx = SessionContext {
                store: self.store.clone(),
                geo: self.geo.clone(),
                slot: self.slot.clone(),
                driver_name: name,
                tick_fix: FixRequest {
                    high_accuracy: true,
                    timeout: self.settings.tick_interval,
                    maximum_age: self.settings.tick_interval,
                },
                metrics: self.metrics.clone(),
            };
            move |shutdown| run_session(ctx, ticks, position_watch, shutdown)
        });

        let id = Uuid::new_v4();
        info!(session_id = %id, slot = %self.slot, "tracking session started");
        *session = Some(Session {
            id,
            scheduler,
            wake_holder,
        });
        self.metrics.active_tracking_sessions.inc();

        Ok(())
    }

    /// Stops the session. Every resource is released unconditionally;
    /// stopping when no session is active, or when the slot was never
    /// written, is a no-op rather than an error.
    pub async fn stop(&self) -> StopReport {
        let taken = self.session.lock().await.take();
        let was_active = taken.is_some();

        let mut report = StopReport {
            was_active,
            scheduler_stopped: false,
            wake_holder_stopped: false,
            slot_marked_inactive: false,
        };

        if let Some(session) = taken {
            report.scheduler_stopped = session.scheduler.cancel().await;
            report.wake_holder_stopped = session.wake_holder.cancel().await;
            self.metrics.active_tracking_sessions.dec();
            info!(session_id = %session.id, slot = %self.slot, "tracking session stopped");
        }

        if was_active {
            report.slot_marked_inactive = self.mark_slot_inactive();
        }

        report
    }

    /// Writes isTracking=false when the slot holds a record. A slot that
    /// was never written needs no marking; that is still success.
    fn mark_slot_inactive(&self) -> bool {
        match self.store.read(&self.slot) {
            Ok(Some(_)) => {
                let patch = LocationPatch::default().tracking(false);
                match self.store.merge(&self.slot, patch) {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(slot = %self.slot, error = %err, "failed to mark slot inactive");
                        false
                    }
                }
            }
            Ok(None) => false,
            Err(err) => {
                warn!(slot = %self.slot, error = %err, "could not read slot during teardown");
                false
            }
        }
    }

    /// Thin write passthrough for a caller that already holds coordinates.
    /// Returns whether the write landed.
    pub fn update_location(&self, coords: Coordinates, driver_name: Option<String>) -> bool {
        let patch = LocationPatch::position(coords, now_ms()).driver_name(driver_name);
        let written = self.store.merge_logged(&self.slot, patch).is_some();
        let outcome = if written { "success" } else { "error" };
        self.metrics
            .location_updates_total
            .with_label_values(&[outcome])
            .inc();
        written
    }

    async fn acquire_fix(&self, request: FixRequest) -> Result<Coordinates, GeoError> {
        let started = Instant::now();
        let result = self.geo.current_position(request).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .position_fix_latency_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
        result
    }
}

struct SessionContext<G> {
    store: StoreClient,
    geo: Arc<G>,
    slot: SlotId,
    driver_name: String,
    tick_fix: FixRequest,
    metrics: Metrics,
}

impl<G: GeolocationProvider> SessionContext<G> {
    fn write_fix(&self, coords: Coordinates) {
        let patch = LocationPatch::position(coords, now_ms())
            .driver_name(Some(self.driver_name.clone()));
        let outcome = if self.store.merge_logged(&self.slot, patch).is_some() {
            "success"
        } else {
            "error"
        };
        self.metrics
            .location_updates_total
            .with_label_values(&[outcome])
            .inc();
    }

    async fn tick(&self) {
        match self.geo.current_position(self.tick_fix).await {
            Ok(coords) => self.write_fix(coords),
            // Soft failure for this attempt only; the next tick supersedes.
            Err(err) => debug!(slot = %self.slot, error = %err, "tick fix skipped"),
        }
    }
}

/// One logical tick source per session: the continuous position watch and
/// the fixed-interval ticks feed the same write path, and the shutdown
/// signal cancels both at once.
async fn run_session<G: GeolocationProvider>(
    ctx: SessionContext<G>,
    mut ticks: mpsc::Receiver<()>,
    mut position_watch: PositionWatch,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks_open = true;
    let mut watch_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            tick = ticks.recv(), if ticks_open => match tick {
                Some(()) => ctx.tick().await,
                None => ticks_open = false,
            },
            event = position_watch.recv(), if watch_open => match event {
                Some(Ok(coords)) => ctx.write_fix(coords),
                Some(Err(err)) => {
                    warn!(slot = %ctx.slot, error = %err, "position watch error")
                }
                None => watch_open = false,
            },
        }
    }
}

/// Holds the wake lock for the lifetime of a session, reacquiring it when
/// the platform revokes it early. A single lock per device: reacquisition
/// releases the old handle before requesting a new one.
async fn hold_wake_lock<W: WakeLockProvider>(wake: Arc<W>, mut shutdown: watch::Receiver<bool>) {
    let mut held = match wake.request().await {
        Ok(lock) => lock,
        Err(err) => {
            warn!(error = %err, "wake lock unavailable; session continues without it");
            let _ = shutdown.changed().await;
            return;
        }
    };

    loop {
        let mut revoked = held.revoked();
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = revoked.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*revoked.borrow() {
                    continue;
                }
                held.release();
                match wake.request().await {
                    Ok(lock) => held = lock,
                    Err(err) => {
                        warn!(error = %err, "wake lock revoked and not reacquired");
                        let _ = shutdown.changed().await;
                        return;
                    }
                }
            }
        }
    }

    held.release();
}

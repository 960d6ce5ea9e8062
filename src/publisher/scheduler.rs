use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Produces the fixed-cadence ticks that drive redundant position fixes
/// during a session. Pluggable so the background-survival strategy can be
/// swapped (and so tests can drive ticks by hand). Dropping the receiver
/// stops the source.
pub trait TickStrategy: Send + Sync + 'static {
    fn ticks(&self, period: Duration) -> mpsc::Receiver<()>;
}

/// Default strategy: a dedicated task ticking on a tokio interval. The
/// first tick fires one period after start; the session already wrote an
/// immediate fix.
pub struct IntervalTicks;

impl TickStrategy for IntervalTicks {
    fn ticks(&self, period: Duration) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = interval.tick() => {
                        if tx.send(()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Owns one cancellable session task. Cancellation waits for the task to
/// wind down, so no further writes happen after `cancel` returns; a write
/// already in flight at that point may still land.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(f(shutdown_rx));
        Self { shutdown_tx, task }
    }

    pub async fn cancel(self) -> bool {
        if self.shutdown_tx.send(true).is_err() {
            // Task already gone; nothing left to wait for.
            self.task.abort();
            return true;
        }
        self.task.await.is_ok()
    }
}

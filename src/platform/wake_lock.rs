use std::future::Future;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Error)]
pub enum WakeLockError {
    #[error("wake lock not supported on this platform")]
    Unsupported,

    #[error("wake lock request denied: {0}")]
    Denied(String),
}

/// A held wake lock. The platform may revoke it while a session is still
/// active; holders observe that through `revoked` and reacquire.
pub trait WakeLock: Send + Sync {
    fn release(&self);

    /// Flips to true if the platform revokes the lock.
    fn revoked(&self) -> watch::Receiver<bool>;
}

/// Optional capability: keeps the device from sleeping during an active
/// publishing session. Sessions proceed degraded when unsupported.
pub trait WakeLockProvider: Send + Sync + 'static {
    fn request(&self) -> impl Future<Output = Result<Box<dyn WakeLock>, WakeLockError>> + Send;
}

/// Server processes have no display to keep awake.
pub struct UnsupportedWakeLock;

impl WakeLockProvider for UnsupportedWakeLock {
    async fn request(&self) -> Result<Box<dyn WakeLock>, WakeLockError> {
        Err(WakeLockError::Unsupported)
    }
}

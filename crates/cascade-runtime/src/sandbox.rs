//! External resource cleanup.

use async_trait::async_trait;
use tracing::debug;

/// A resource held for the duration of an agent run.
///
/// `release` runs exactly once when the run ends, on every exit path
/// including step failure. Implementations must tolerate being called
/// with the resource already gone.
#[async_trait]
pub trait ResourceGuard: Send + Sync {
    /// Tear the resource down. Errors are the implementation's to log;
    /// a run outcome is never changed by cleanup.
    async fn release(&self);
}

/// Guard for agents that hold nothing external.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGuard;

#[async_trait]
impl ResourceGuard for NoopGuard {
    async fn release(&self) {
        debug!("no resources to release");
    }
}

//! Cooperative stop signal shared by a server and its tasks.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable trigger and observer for a server's stop condition.
///
/// Stopping is idempotent. Tasks observe the signal only at their own loop
/// checkpoints; nothing is interrupted mid-read.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("stop signal raised");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the stop signal has been raised.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

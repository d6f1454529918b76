//! Cooperative cancellation for a single render request.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle. Every clone observes the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // Only errs if the sender is dropped, and `&self` keeps it alive.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

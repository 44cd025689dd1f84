use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Handle used to request cancellation of a stream session.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Creates a handle and the first signal observing it.
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, AbortSignal { rx })
    }

    /// Requests cancellation.
    ///
    /// Cancellation is cooperative: readers observe it at their next
    /// suspension point and stop without draining the source.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a new signal observing this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Returns true if both handles control the same session.
    pub fn same_session(&self, other: &AbortHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Spawns a timer that aborts the session after `deadline`.
    ///
    /// Aborting the returned task disarms the timer. Must be called from
    /// within a tokio runtime.
    pub fn abort_after(&self, deadline: Duration) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !handle.is_aborted() {
                tracing::debug!(?deadline, "cancellation deadline reached");
                handle.abort();
            }
        })
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Returns true once cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    ///
    /// Never resolves if every handle is dropped without aborting.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

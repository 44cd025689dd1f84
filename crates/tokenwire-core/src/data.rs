//! Side-channel of JSON values multiplexed next to the text stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::errors::DataError;

/// Producer handle for the data side channel.
///
/// Clones share one sequence. Values appended between two encoder flushes
/// travel together as one batch. The sequence must be closed before a tagged
/// stream can finish.
#[derive(Clone, Debug, Default)]
pub struct StreamData {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    pending: Vec<serde_json::Value>,
    closed: bool,
}

/// Values drained by the encoder in one step.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct DataBatch {
    pub events: Vec<serde_json::Value>,
    pub closed: bool,
}

impl StreamData {
    /// Creates an open, empty data channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value to the pending batch.
    ///
    /// Fails immediately with [`DataError::Closed`] after [`close`](Self::close).
    pub fn append<T: serde::Serialize + ?Sized>(&self, value: &T) -> Result<(), DataError> {
        let value =
            serde_json::to_value(value).map_err(|e| DataError::Serialize(e.to_string()))?;
        {
            let mut state = self.lock();
            if state.closed {
                return Err(DataError::Closed);
            }
            state.pending.push(value);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Signals that no further values will be appended. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                debug!("stream data closed more than once");
                return;
            }
            state.closed = true;
        }
        self.shared.notify.notify_one();
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Takes every value appended since the previous call.
    pub(crate) fn take_batch(&self) -> DataBatch {
        let mut state = self.lock();
        DataBatch {
            events: std::mem::take(&mut state.pending),
            closed: state.closed,
        }
    }

    /// Resolves after the next append or close (or immediately if one happened
    /// since the last wakeup).
    pub(crate) async fn changed(&self) {
        self.shared.notify.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn batches_collect_values_between_takes() {
        let data = StreamData::new();
        data.append(&serde_json::json!({"t1": "v1"})).expect("append");
        data.append("second").expect("append");
        let batch = data.take_batch();
        assert_eq!(
            batch.events,
            vec![serde_json::json!({"t1": "v1"}), serde_json::json!("second")]
        );
        assert!(!batch.closed);
        assert_eq!(data.take_batch(), DataBatch::default());
    }

    #[test]
    fn append_after_close_is_rejected() {
        let data = StreamData::new();
        let producer = data.clone();
        data.close();
        assert!(producer.is_closed());
        assert_eq!(producer.append(&1), Err(DataError::Closed));
        data.close();
        assert!(data.take_batch().closed);
    }

    #[test]
    fn pending_values_survive_close() {
        let data = StreamData::new();
        data.append(&[1, 2]).expect("append");
        data.close();
        let batch = data.take_batch();
        assert_eq!(batch.events, vec![serde_json::json!([1, 2])]);
        assert!(batch.closed);
    }

    #[tokio::test]
    async fn changed_wakes_for_appends_made_before_waiting() {
        let data = StreamData::new();
        data.append(&true).expect("append");
        tokio::time::timeout(Duration::from_millis(100), data.changed())
            .await
            .expect("stored notification");
    }

    #[tokio::test]
    async fn changed_wakes_on_close_from_another_task() {
        let data = StreamData::new();
        let producer = data.clone();
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.close();
        });
        tokio::time::timeout(Duration::from_secs(1), data.changed())
            .await
            .expect("close notification");
        closer.await.expect("join");
        assert!(data.is_closed());
    }
}

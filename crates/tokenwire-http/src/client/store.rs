use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Snapshot of one keyed completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub data: Vec<serde_json::Value>,
}

/// Keyed completion state shared between clients.
///
/// Clients using the same key read and write the same entry; concurrent
/// writers are last-writer-wins. Each entry is a watch channel, so
/// subscribers see every update.
#[derive(Clone, Debug, Default)]
pub struct CompletionStore {
    entries: Arc<DashMap<String, watch::Sender<Completion>>>,
}

impl CompletionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot, or an empty one for unknown keys.
    pub fn get(&self, key: &str) -> Completion {
        self.entries
            .get(key)
            .map(|entry| entry.borrow().clone())
            .unwrap_or_default()
    }

    /// Replaces the text under `key`, keeping its data.
    pub fn set_text(&self, key: &str, text: impl Into<String>) {
        let text = text.into();
        self.update(key, |c| c.text = text);
    }

    /// Appends one fragment to the text under `key`.
    pub fn append_text(&self, key: &str, fragment: &str) {
        self.update(key, |c| c.text.push_str(fragment));
    }

    /// Appends a batch of data values under `key`.
    pub fn extend_data(&self, key: &str, events: Vec<serde_json::Value>) {
        self.update(key, |c| c.data.extend(events));
    }

    /// Replaces the data list.
    pub fn set_data(&self, key: &str, data: Vec<serde_json::Value>) {
        self.update(key, |c| c.data = data);
    }

    /// Subscribes to updates of one key, creating the entry if needed.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<Completion> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(Completion::default()).0)
            .subscribe()
    }

    /// Removes a key, returning its last snapshot. Existing subscribers see
    /// the channel close.
    pub fn remove(&self, key: &str) -> Option<Completion> {
        self.entries
            .remove(key)
            .map(|(_, sender)| sender.borrow().clone())
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update(&self, key: &str, modify: impl FnOnce(&mut Completion)) {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(Completion::default()).0)
            .send_modify(modify);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_keys_read_as_empty_without_being_created() {
        let store = CompletionStore::new();
        assert_eq!(store.get("missing"), Completion::default());
        assert!(store.is_empty());
    }

    #[test]
    fn text_and_data_updates_accumulate() {
        let store = CompletionStore::new();
        store.append_text("k", "Hel");
        store.append_text("k", "lo");
        store.extend_data("k", vec![json!(1)]);
        store.extend_data("k", vec![json!({"a": 2})]);
        assert_eq!(
            store.get("k"),
            Completion {
                text: "Hello".into(),
                data: vec![json!(1), json!({"a": 2})],
            }
        );
        store.set_text("k", "");
        assert_eq!(store.get("k").text, "");
        assert_eq!(store.get("k").data.len(), 2);

        store.set_data("k", vec![json!("only")]);
        assert_eq!(store.get("k").data, vec![json!("only")]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_entries_and_subscribers_see_updates() {
        let store = CompletionStore::new();
        let other = store.clone();
        let mut rx = store.subscribe("shared");
        other.append_text("shared", "x");
        rx.changed().await.expect("update");
        assert_eq!(rx.borrow().text, "x");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn remove_closes_subscriptions() {
        let store = CompletionStore::new();
        let mut rx = store.subscribe("k");
        store.set_text("k", "done");
        assert_eq!(
            store.remove("k").map(|c| c.text),
            Some("done".to_string())
        );
        rx.changed().await.expect("pending update is still delivered");
        assert!(rx.changed().await.is_err());
        assert!(store.get("k").text.is_empty());
    }
}

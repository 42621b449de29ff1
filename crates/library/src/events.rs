use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub const LIBRARY_PROGRESS: &str = "library-progress";
pub const LIBRARY_UPDATED: &str = "library-updated";
pub const ITEM_UPDATED: &str = "item-updated";
pub const REBUILD_FAILED: &str = "rebuild-failed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Fire-and-forget broadcast to whoever is listening.
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send(&self, kind: &str, data: Value) {
        // No receivers is fine.
        let _ = self.sender.send(Notification {
            kind: kind.to_string(),
            data,
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_messages() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe();
        notifier.send(ITEM_UPDATED, serde_json::json!({"id": 42}));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.kind, ITEM_UPDATED);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({"type": "item-updated", "data": {"id": 42}})
        );
    }

    #[test]
    fn sending_without_listeners_does_not_fail() {
        Notifier::default().send(LIBRARY_UPDATED, Value::Null);
    }
}

//! In-process publish/subscribe bus.
//!
//! The feed store publishes a [`crate::message::SignedMessage`] here the
//! moment its insert transaction commits; index hooks and live
//! `createHistoryStream` followers subscribe. Backed by `tokio::sync::broadcast`
//! so a slow subscriber lags rather than blocking the writer.

use tokio::sync::broadcast;

use crate::message::SignedMessage;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct Topic {
    tx: broadcast::Sender<SignedMessage>,
}

impl Default for Topic {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Topic { tx }
    }
}

impl Topic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast a freshly committed message to every live subscriber.
    /// Returns the number of receivers that got it (0 if none are listening).
    pub fn publish(&self, msg: SignedMessage) -> usize {
        self.tx.send(msg).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignedMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ref_::Ref;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let topic = Topic::new();
        let mut rx = topic.subscribe();
        let key = SigningKey::generate(&mut OsRng);
        let author = Ref::feed(key.verifying_key().to_bytes());
        let msg = crate::message::Message {
            previous: None,
            author,
            sequence: 1,
            timestamp: 1,
            hash: "sha256".into(),
            content: json!({"type": "post"}),
        }
        .sign(&key);
        topic.publish(msg.clone());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.key().unwrap(), msg.key().unwrap());
    }
}

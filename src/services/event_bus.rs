//! Topic-based publish/subscribe fan-out. Delivery is at-most-once: slow or
//! absent subscribers miss messages and recover through a fresh snapshot.

use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A published message: topic plus an opaque payload delivered unchanged.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish/subscribe facade consumed by the gateway and the engine core.
pub trait PubSub: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes);
    fn subscribe(&self, pattern: &str) -> BusSubscription;
}

/// Topic for events visible to everyone in a room.
pub fn room_topic(room_id: Uuid) -> String {
    format!("room:{room_id}")
}

/// Topic for events addressed to a single player of a room.
pub fn player_topic(room_id: Uuid, player_id: Uuid) -> String {
    format!("room:{room_id}:player:{player_id}")
}

/// Subscription pattern: either an exact topic or a `prefix*` wildcard.
#[derive(Debug, Clone)]
enum TopicPattern {
    Exact(String),
    Prefix(String),
}

impl TopicPattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => TopicPattern::Prefix(prefix.to_owned()),
            None => TopicPattern::Exact(pattern.to_owned()),
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(exact) => topic == exact,
            TopicPattern::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }
}

/// In-process bus backed by a single Tokio broadcast channel; subscribers
/// filter on their pattern.
pub struct BroadcastBus {
    sender: broadcast::Sender<PubSubMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl PubSub for BroadcastBus {
    fn publish(&self, topic: &str, payload: Bytes) {
        let _ = self.sender.send(PubSubMessage {
            topic: topic.to_owned(),
            payload,
        });
    }

    fn subscribe(&self, pattern: &str) -> BusSubscription {
        BusSubscription {
            pattern: TopicPattern::parse(pattern),
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving half of a subscription. Lagged messages are dropped silently,
/// honouring the at-most-once contract.
pub struct BusSubscription {
    pattern: TopicPattern,
    receiver: broadcast::Receiver<PubSubMessage>,
}

impl BusSubscription {
    /// Next message matching the pattern, or `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.pattern.matches(&message.topic) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_topic_delivery() {
        let bus = BroadcastBus::new(8);
        let room_id = Uuid::new_v4();
        let mut sub = bus.subscribe(&room_topic(room_id));

        bus.publish(&room_topic(Uuid::new_v4()), Bytes::from_static(b"other"));
        bus.publish(&room_topic(room_id), Bytes::from_static(b"mine"));

        let message = sub.recv().await.unwrap();
        assert_eq!(message.payload, Bytes::from_static(b"mine"));
    }

    #[tokio::test]
    async fn prefix_pattern_matches_player_topics() {
        let bus = BroadcastBus::new(8);
        let room_id = Uuid::new_v4();
        let player_id = Uuid::new_v4();
        let mut sub = bus.subscribe(&format!("room:{room_id}:*"));

        bus.publish(&player_topic(room_id, player_id), Bytes::from_static(b"secret"));

        let message = sub.recv().await.unwrap();
        assert_eq!(message.topic, player_topic(room_id, player_id));
    }
}

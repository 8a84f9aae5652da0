//! Mock MQTT channel for testing without a real broker.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::channel::Channel;
use crate::error::TransportResult;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions.lock().unwrap().iter().any(|f| f == filter)
    }

    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()> {
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> TransportResult<()> {
        self.subscriptions.lock().unwrap().push(filter.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_publishes_and_subscriptions() {
        let mock = MockChannel::new();
        mock.publish("a", b"1").await.unwrap();
        mock.publish("b", b"2").await.unwrap();
        mock.subscribe("filter").await.unwrap();

        assert_eq!(mock.published().len(), 2);
        assert_eq!(mock.published_to("a").len(), 1);
        assert!(mock.is_subscribed_to("filter"));

        mock.reset();
        assert!(mock.published().is_empty());
        assert!(mock.subscriptions().is_empty());
    }
}

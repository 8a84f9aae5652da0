//! MQTT connection pool (C5): one broker client per domain, shared by
//! every device on that domain, with serialised connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Event, EventLoop, Packet};
use tokio::sync::{broadcast, Mutex};

use crate::channel::{Channel, MqttChannel};
use crate::error::{TransportError, TransportResult};
use meross_protocol::topics;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A raw inbound publish, handed up to the caller (manager) for
/// routing — either to the correlation registry or to a device's
/// inbound handler, per §4.5.
#[derive(Debug, Clone)]
pub struct InboundPublish {
    pub domain: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker-level notifications the pool can't route itself (§4.5 "On
/// transport failure" / "On close").
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Inbound(InboundPublish),
    Error { domain: String, message: String },
    Disconnected { domain: String, reason: Option<String> },
}

struct DomainConnection {
    channel: Arc<MqttChannel>,
}

/// One pool instance manages the set of broker connections for an
/// entire manager session.
pub struct MqttPool {
    connections: Mutex<HashMap<String, DomainConnection>>,
    /// In-flight connect futures, keyed by domain, so concurrent
    /// enrollments on the same domain share one connect attempt (§4.5,
    /// §5 "Per-broker connect ordering").
    connecting: Mutex<HashMap<String, Arc<tokio::sync::Notify>>>,
    events: broadcast::Sender<PoolEvent>,
}

impl MqttPool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            connections: Mutex::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub async fn channel_for(&self, domain: &str) -> Option<Arc<MqttChannel>> {
        self.connections
            .lock()
            .await
            .get(domain)
            .map(|c| c.channel.clone())
    }

    /// Ensure a connection exists for `domain`, connecting if needed.
    /// Concurrent callers for the same domain await the same attempt.
    pub async fn ensure_connected(
        &self,
        host: &str,
        port: u16,
        user_id: &str,
        key: &str,
        app_id: &str,
    ) -> TransportResult<Arc<MqttChannel>> {
        let domain = format!("{host}:{port}");

        if let Some(existing) = self.channel_for(&domain).await {
            return Ok(existing);
        }

        // Serialise connect attempts per domain: first caller connects,
        // everyone else waits on the same Notify.
        let notify = {
            let mut connecting = self.connecting.lock().await;
            if let Some(existing) = connecting.get(&domain) {
                Some(existing.clone())
            } else {
                connecting.insert(domain.clone(), Arc::new(tokio::sync::Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            return self
                .channel_for(&domain)
                .await
                .ok_or_else(|| TransportError::Connection(format!("connect to {domain} failed")));
        }

        let result = tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.connect_domain(host, port, user_id, key, app_id, &domain),
        )
        .await
        .map_err(|_| TransportError::Connection(format!("connect to {domain} timed out")))
        .and_then(|r| r);

        let notify = {
            let mut connecting = self.connecting.lock().await;
            connecting.remove(&domain)
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        result
    }

    async fn connect_domain(
        &self,
        host: &str,
        port: u16,
        user_id: &str,
        key: &str,
        app_id: &str,
        domain: &str,
    ) -> TransportResult<Arc<MqttChannel>> {
        let (channel, eventloop) = MqttChannel::connect(host, port, user_id, key, app_id);
        let channel = Arc::new(channel);

        channel
            .subscribe(&topics::client_response(user_id, app_id))
            .await?;
        channel.subscribe(&topics::client_user(user_id)).await?;

        self.connections.lock().await.insert(
            domain.to_string(),
            DomainConnection {
                channel: channel.clone(),
            },
        );

        let events = self.events.clone();
        let domain_owned = domain.to_string();
        tokio::spawn(drive_event_loop(eventloop, domain_owned, events));

        Ok(channel)
    }

    pub async fn publish(&self, domain: &str, topic: &str, payload: &[u8]) -> bool {
        match self.channel_for(domain).await {
            Some(channel) => channel.publish(topic, payload).await.is_ok(),
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        self.connections.lock().await.clear();
        self.connecting.lock().await.clear();
    }
}

impl Default for MqttPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    domain: String,
    events: broadcast::Sender<PoolEvent>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = events.send(PoolEvent::Inbound(InboundPublish {
                    domain: domain.clone(),
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!(domain = %domain, "mqtt broker closed the connection");
                let _ = events.send(PoolEvent::Disconnected {
                    domain: domain.clone(),
                    reason: None,
                });
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "mqtt event loop error, retrying in 5s");
                let _ = events.send(PoolEvent::Error {
                    domain: domain.clone(),
                    message: e.to_string(),
                });
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_for_unknown_domain_is_none() {
        let pool = MqttPool::new();
        assert!(pool.channel_for("nope:1").await.is_none());
    }

    #[tokio::test]
    async fn publish_without_connection_returns_false() {
        let pool = MqttPool::new();
        assert!(!pool.publish("nope:1", "topic", b"x").await);
    }
}

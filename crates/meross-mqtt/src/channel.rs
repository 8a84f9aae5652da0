//! MQTT channel — async client wrapping `rumqttc::AsyncClient` for a
//! single Meross broker domain.

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::codec;
use crate::error::{TransportError, TransportResult};

/// Abstraction for MQTT publish/subscribe, so the manager can be tested
/// without a real broker.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()>;
    async fn subscribe(&self, filter: &str) -> TransportResult<()>;
}

/// One MQTT connection to a single Meross broker domain, shared by
/// every device whose `domain` field resolves to this host/port (C5).
pub struct MqttChannel {
    client: AsyncClient,
    domain: String,
}

/// Default TLS port for the Meross cloud broker — not the MQTT
/// ecosystem default of 8883.
pub const MEROSS_BROKER_PORT: u16 = 2001;

impl MqttChannel {
    /// Connect over TLS to the Meross broker on `port` (typically
    /// [`MEROSS_BROKER_PORT`], not the MQTT default of 8883).
    pub fn connect(
        host: &str,
        port: u16,
        user_id: &str,
        key: &str,
        app_id: &str,
    ) -> (Self, EventLoop) {
        let client_id = format!("app:{app_id}");
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(std::time::Duration::from_secs(30));
        options.set_credentials(user_id, codec::mqtt_password(user_id, key));
        options.set_transport(rumqttc::Transport::tls_with_default_config());

        let (client, eventloop) = AsyncClient::new(options, 64);
        (
            Self {
                client,
                domain: format!("{host}:{port}"),
            },
            eventloop,
        )
    }

    /// Connect without TLS, for local integration testing against a
    /// plaintext broker.
    pub fn connect_plaintext(
        host: &str,
        port: u16,
        user_id: &str,
        key: &str,
        app_id: &str,
    ) -> (Self, EventLoop) {
        let client_id = format!("app:{app_id}");
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(std::time::Duration::from_secs(30));
        options.set_credentials(user_id, codec::mqtt_password(user_id, key));

        let (client, eventloop) = AsyncClient::new(options, 64);
        (
            Self {
                client,
                domain: format!("{host}:{port}"),
            },
            eventloop,
        )
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> TransportResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> TransportResult<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }
}

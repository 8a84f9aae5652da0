//! Device core (C8): per-device state cache, publish pipeline and
//! inbound message routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meross_protocol::abilities::Abilities;
use meross_protocol::device::DeviceInfo;
use meross_protocol::envelope::{Envelope, Method};
use meross_protocol::error::{CommandDescriptor, MerossError, MerossResult};
use meross_mqtt::codec;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::arbiter::{Dispatched, TransportArbiter, TransportMode};
use crate::correlation::CorrelationRegistry;
use crate::queue::RequestQueue;

/// Where an updated state value came from, carried in every emitted
/// `state` event (§4.9 "Inbound routing").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    Push,
    Poll,
    Cache,
}

/// A single cache update, emitted after inbound routing or a poll.
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub namespace: String,
    pub channel: Option<u8>,
    pub value: Value,
    pub source: StateSource,
    pub timestamp: DateTime<Utc>,
}

/// A handler invoked when a push/poll payload lands on a namespace.
/// The handler table is built once and never mutated afterward
/// (§4.9: "handler tables are immutable after construction").
pub type NamespaceHandler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Live, mutable per-device state: the bits that change over the
/// session, separate from the immutable `DeviceInfo`/`Abilities` held
/// by the registry.
struct DeviceState {
    cache: HashMap<(String, Option<u8>), Value>,
    last_full_update: Option<DateTime<Utc>>,
}

/// Runtime handle for one device: ties together C1 (codec), C3
/// (queue), C4 (correlation) and C7 (arbiter) behind `publish_message`,
/// and owns inbound routing.
pub struct DeviceCore {
    pub info: DeviceInfo,
    pub abilities: Abilities,
    from_topic: String,
    user_key: String,
    state: RwLock<DeviceState>,
    handlers: HashMap<String, NamespaceHandler>,
    events: broadcast::Sender<StateEvent>,
    correlation: Arc<CorrelationRegistry>,
    queue: Arc<RequestQueue>,
    arbiter: Arc<TransportArbiter>,
}

impl DeviceCore {
    pub fn new(
        info: DeviceInfo,
        abilities: Abilities,
        from_topic: String,
        user_key: String,
        handlers: HashMap<String, NamespaceHandler>,
        correlation: Arc<CorrelationRegistry>,
        queue: Arc<RequestQueue>,
        arbiter: Arc<TransportArbiter>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            info,
            abilities,
            from_topic,
            user_key,
            state: RwLock::new(DeviceState {
                cache: HashMap::new(),
                last_full_update: None,
            }),
            handlers,
            events,
            correlation,
            queue,
            arbiter,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Encode, register for correlation, dispatch through the arbiter,
    /// and await the matching reply (§4.9 `publishMessage`).
    pub async fn publish_message(
        &self,
        method: Method,
        namespace: &str,
        payload: Value,
        mode: TransportMode,
        session_timeout: Duration,
        mqtt_domain: &str,
        mqtt_topic: &str,
    ) -> MerossResult<Value> {
        let envelope = codec::encode(
            method,
            namespace,
            payload,
            &self.info.uuid,
            &self.from_topic,
            &self.user_key,
        );
        let message_id = envelope.header.message_id.clone();
        let descriptor = CommandDescriptor {
            namespace: namespace.to_string(),
            method: format!("{method:?}"),
        };

        let correlation = self.correlation.clone();
        let uuid = self.info.uuid.clone();

        let reply = correlation.register(message_id.clone(), uuid, descriptor, session_timeout);

        let dispatch_result = self
            .queue
            .enqueue(&self.info.uuid, {
                let arbiter = self.arbiter.clone();
                let info = self.info.clone();
                let envelope = envelope.clone();
                let mqtt_domain = mqtt_domain.to_string();
                let mqtt_topic = mqtt_topic.to_string();
                move || {
                    Box::pin(async move {
                        arbiter
                            .dispatch(
                                &info,
                                &envelope,
                                mode,
                                session_timeout,
                                &mqtt_domain,
                                &mqtt_topic,
                            )
                            .await
                    })
                }
            })
            .await;

        match dispatch_result {
            Ok(Dispatched::Lan(lan_envelope)) => {
                // LAN replies resolve the correlation registry
                // directly, exactly as an MQTT publish would.
                self.route_inbound(&lan_envelope).await;
            }
            Ok(Dispatched::Mqtt) => {}
            Err(err) => {
                self.correlation
                    .fail(&message_id, MerossError::Mqtt(err.to_string()))
                    .await;
            }
        }

        reply.await
    }

    /// Route a parsed inbound envelope: complete a pending call if the
    /// message id matches, otherwise treat it as a push and dispatch
    /// to the namespace handler table (§4.9 "Inbound routing").
    ///
    /// Reentrancy-safe: no shared mutable state is held across an
    /// await point except through the lock-guarded cache.
    pub async fn route_inbound(&self, envelope: &Envelope) {
        let header = &envelope.header;

        if header.method.is_ack() {
            self.correlation
                .complete(&header.message_id, envelope.payload.clone())
                .await;
            return;
        }
        if header.method == Method::ERROR {
            self.correlation
                .fail(&header.message_id, MerossError::Command(envelope.payload.clone()))
                .await;
            return;
        }

        self.handle_push(&header.namespace, &envelope.payload).await;
    }

    async fn handle_push(&self, namespace: &str, payload: &Value) {
        let Some(handler) = self.handlers.get(namespace) else {
            return;
        };
        let Some(value) = handler(payload) else {
            return;
        };

        let timestamp = Utc::now();
        {
            let mut state = self.state.write().await;
            state.cache.insert((namespace.to_string(), None), value.clone());
        }

        let event = StateEvent {
            namespace: namespace.to_string(),
            channel: None,
            value,
            source: StateSource::Push,
            timestamp,
        };
        // Emission is best-effort: no receivers is not an error.
        let _ = self.events.send(event);
    }

    pub async fn cached_value(&self, namespace: &str) -> Option<Value> {
        self.state
            .read()
            .await
            .cache
            .get(&(namespace.to_string(), None))
            .cloned()
    }

    pub async fn last_full_update(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_full_update
    }

    pub async fn mark_full_update(&self, snapshot: Value) {
        let timestamp = Utc::now();
        let mut state = self.state.write().await;
        state.cache.insert(("__snapshot__".to_string(), None), snapshot);
        state.last_full_update = Some(timestamp);
    }

    pub fn supports_rgb(&self) -> bool {
        self.abilities.supports_rgb()
    }

    pub fn supports_temperature(&self) -> bool {
        self.abilities.supports_temperature()
    }

    pub fn supports_luminance(&self) -> bool {
        self.abilities.supports_luminance()
    }
}

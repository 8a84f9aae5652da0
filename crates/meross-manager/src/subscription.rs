//! Subscription engine (C9): per-device polling loops with push
//! suppression, smart caching and a device-list poller.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use meross_protocol::device::DeviceInfo;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use crate::device::{DeviceCore, StateSource};
use crate::events::{DeviceListUpdate, PollEvent};
use crate::http_client::HttpApiClient;

pub const DEFAULT_DEVICE_STATE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_ELECTRICITY_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_CONSUMPTION_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_DEVICE_LIST_INTERVAL_MS: u64 = 120_000;
pub const DEFAULT_CACHE_MAX_AGE_MS: u64 = 10_000;

const PUSH_INACTIVITY_MS: u64 = 60_000;
const POLL_SKIP_AFTER_PUSH_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub device_state_interval: Duration,
    pub electricity_interval: Duration,
    pub consumption_interval: Duration,
    pub http_device_list_interval: Duration,
    pub smart_caching: bool,
    pub cache_max_age: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            device_state_interval: Duration::from_millis(DEFAULT_DEVICE_STATE_INTERVAL_MS),
            electricity_interval: Duration::from_millis(DEFAULT_ELECTRICITY_INTERVAL_MS),
            consumption_interval: Duration::from_millis(DEFAULT_CONSUMPTION_INTERVAL_MS),
            http_device_list_interval: Duration::from_millis(DEFAULT_DEVICE_LIST_INTERVAL_MS),
            smart_caching: false,
            cache_max_age: Duration::from_millis(DEFAULT_CACHE_MAX_AGE_MS),
        }
    }
}

/// Tracks push activity for a single device so the poller can skip
/// redundant work (§4.10 "Push suppression").
struct PushActivity {
    active: bool,
    last_seen: Option<Instant>,
}

impl Default for PushActivity {
    fn default() -> Self {
        Self {
            active: false,
            last_seen: None,
        }
    }
}

/// Minimum requested polling interval per listener group, aggregated
/// across every registered listener (§4.10: "takes the minimum").
#[derive(Default)]
struct IntervalRegistry {
    requested: Vec<Duration>,
}

impl IntervalRegistry {
    fn register(&mut self, interval: Duration) {
        self.requested.push(interval);
    }

    fn effective(&self, default: Duration) -> Duration {
        self.requested.iter().copied().min().unwrap_or(default)
    }
}

pub struct SubscriptionEngine {
    config: SubscriptionConfig,
    push_state: RwLock<HashMap<String, PushActivity>>,
    device_state_listeners: RwLock<HashMap<String, IntervalRegistry>>,
    events: broadcast::Sender<PollEvent>,
    device_list_events: broadcast::Sender<DeviceListUpdate>,
    last_device_list: RwLock<Option<HashMap<String, DeviceInfo>>>,
}

impl SubscriptionEngine {
    pub fn new(config: SubscriptionConfig) -> Self {
        let (events, _) = broadcast::channel(512);
        let (device_list_events, _) = broadcast::channel(16);
        Self {
            config,
            push_state: RwLock::new(HashMap::new()),
            device_state_listeners: RwLock::new(HashMap::new()),
            events,
            device_list_events,
            last_device_list: RwLock::new(None),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_device_list(&self) -> broadcast::Receiver<DeviceListUpdate> {
        self.device_list_events.subscribe()
    }

    /// Register a listener's requested device-state polling interval;
    /// the effective interval is the minimum across all listeners.
    pub async fn register_device_state_interval(&self, uuid: &str, interval: Duration) {
        self.device_state_listeners
            .write()
            .await
            .entry(uuid.to_string())
            .or_default()
            .register(interval);
    }

    pub async fn effective_device_state_interval(&self, uuid: &str) -> Duration {
        self.device_state_listeners
            .read()
            .await
            .get(uuid)
            .map(|r| r.effective(self.config.device_state_interval))
            .unwrap_or(self.config.device_state_interval)
    }

    /// Mark that a push notification just arrived for `uuid`
    /// (§4.10 "Push suppression").
    pub async fn note_push(&self, uuid: &str) {
        let mut push_state = self.push_state.write().await;
        let entry = push_state.entry(uuid.to_string()).or_default();
        entry.active = true;
        entry.last_seen = Some(Instant::now());
    }

    /// True if a device-state poll scheduled right now should be
    /// skipped because push activity is recent.
    pub async fn should_skip_device_state_poll(&self, uuid: &str) -> bool {
        let mut push_state = self.push_state.write().await;
        let Some(entry) = push_state.get_mut(uuid) else {
            return false;
        };

        if let Some(last_seen) = entry.last_seen {
            if last_seen.elapsed() >= Duration::from_millis(PUSH_INACTIVITY_MS) {
                entry.active = false;
            }
        }

        if !entry.active {
            return false;
        }

        entry
            .last_seen
            .map(|ts| ts.elapsed() < Duration::from_millis(POLL_SKIP_AFTER_PUSH_MS))
            .unwrap_or(false)
    }

    /// Electricity/consumption polls skip entirely while push is
    /// active, without the 5s grace window device-state polls get.
    pub async fn should_skip_while_push_active(&self, uuid: &str) -> bool {
        let mut push_state = self.push_state.write().await;
        let Some(entry) = push_state.get_mut(uuid) else {
            return false;
        };
        if let Some(last_seen) = entry.last_seen {
            if last_seen.elapsed() >= Duration::from_millis(PUSH_INACTIVITY_MS) {
                entry.active = false;
            }
        }
        entry.active
    }

    /// Poll a device's full state, honouring smart-cache suppression,
    /// emitting a unified event either way.
    pub async fn poll_device_state(&self, device: &DeviceCore) {
        if self.should_skip_device_state_poll(&device.info.uuid).await {
            return;
        }

        if self.config.smart_caching {
            if let Some(last_update) = device.last_full_update().await {
                if Utc::now() - last_update < chrono::Duration::from_std(self.config.cache_max_age).unwrap() {
                    if let Some(cached) = device.cached_value("__snapshot__").await {
                        self.emit(PollEvent {
                            source: StateSource::Cache,
                            timestamp: Utc::now(),
                            device_uuid: device.info.uuid.clone(),
                            state: cached,
                            changes: HashMap::new(),
                        });
                        return;
                    }
                }
            }
        }

        // Full poll over the wire would go here via publish_message;
        // the caller (manager) drives the actual GET and then calls
        // `record_full_update`.
    }

    pub fn record_full_update(&self, device_uuid: &str, snapshot: serde_json::Value) {
        self.emit(PollEvent {
            source: StateSource::Poll,
            timestamp: Utc::now(),
            device_uuid: device_uuid.to_string(),
            state: snapshot,
            changes: HashMap::new(),
        });
    }

    pub(crate) fn emit(&self, mut event: PollEvent) {
        if event.device_uuid.is_empty() {
            event.device_uuid = "unknown".to_string();
        }
        // Emission must not block or panic on listener absence/failure
        // (§4.10: "try/catch-wrapped... do not block other listeners").
        let _ = self.events.send(event);
    }

    /// Poll the HTTP device list, diff against the previous snapshot
    /// by uuid, and emit a single combined event (§4.10 "Device-list poller").
    pub async fn poll_device_list(&self, client: &dyn HttpApiClient) -> anyhow::Result<()> {
        let devices = client.device_list().await?;
        let current: HashMap<String, DeviceInfo> =
            devices.iter().cloned().map(|d| (d.uuid.clone(), d)).collect();

        let mut previous_guard = self.last_device_list.write().await;
        let (added, removed, changed) = match previous_guard.as_ref() {
            None => (
                current.keys().cloned().collect::<Vec<_>>(),
                Vec::new(),
                Vec::new(),
            ),
            Some(previous) => diff_device_lists(previous, &current),
        };
        *previous_guard = Some(current);
        drop(previous_guard);

        let _ = self.device_list_events.send(DeviceListUpdate {
            devices,
            added,
            removed,
            changed,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

fn diff_device_lists(
    previous: &HashMap<String, DeviceInfo>,
    current: &HashMap<String, DeviceInfo>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let previous_keys: HashSet<&String> = previous.keys().collect();
    let current_keys: HashSet<&String> = current.keys().collect();

    let added = current_keys
        .difference(&previous_keys)
        .map(|s| s.to_string())
        .collect();
    let removed = previous_keys
        .difference(&current_keys)
        .map(|s| s.to_string())
        .collect();
    let changed = current_keys
        .intersection(&previous_keys)
        .filter(|uuid| {
            let a = serde_json::to_value(&previous[**uuid]).ok();
            let b = serde_json::to_value(&current[**uuid]).ok();
            a != b
        })
        .map(|s| s.to_string())
        .collect();

    (added, removed, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(uuid: &str) -> DeviceInfo {
        DeviceInfo {
            uuid: uuid.into(),
            dev_name: "d".into(),
            device_type: "t".into(),
            fmware_version: "1".into(),
            hdware_version: "1".into(),
            domain: None,
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

    #[test]
    fn effective_interval_is_the_minimum_across_listeners() {
        let mut registry = IntervalRegistry::default();
        registry.register(Duration::from_secs(30));
        registry.register(Duration::from_secs(10));
        assert_eq!(registry.effective(Duration::from_secs(60)), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn push_suppresses_poll_within_the_skip_window() {
        let engine = SubscriptionEngine::new(SubscriptionConfig::default());
        engine.note_push("u1").await;
        assert!(engine.should_skip_device_state_poll("u1").await);
    }

    #[tokio::test]
    async fn no_push_activity_never_suppresses() {
        let engine = SubscriptionEngine::new(SubscriptionConfig::default());
        assert!(!engine.should_skip_device_state_poll("u1").await);
    }

    #[test]
    fn diff_detects_added_removed_and_changed() {
        let mut previous = HashMap::new();
        previous.insert("u1".to_string(), device("u1"));
        previous.insert("u2".to_string(), device("u2"));

        let mut current = HashMap::new();
        let mut changed_u1 = device("u1");
        changed_u1.dev_name = "renamed".into();
        current.insert("u1".to_string(), changed_u1);
        current.insert("u3".to_string(), device("u3"));

        let (added, removed, changed) = diff_device_lists(&previous, &current);
        assert_eq!(added, vec!["u3".to_string()]);
        assert_eq!(removed, vec!["u2".to_string()]);
        assert_eq!(changed, vec!["u1".to_string()]);
    }
}

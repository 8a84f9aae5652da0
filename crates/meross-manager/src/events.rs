//! Manager- and device-level event types broadcast to listeners
//! (§4.9 `state` events, §4.10 unified polling events, §4.11
//! `deviceInitialized`).

use chrono::{DateTime, Utc};
use meross_protocol::device::DeviceInfo;
use serde_json::Value;
use std::collections::HashMap;

use crate::device::StateEvent;

/// Top-level manager lifecycle events.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    DeviceInitialized { uuid: String },
    DeviceListUpdate(DeviceListUpdate),
    Error { context: String, message: String },
}

/// Result of diffing a polled HTTP device list against the previous
/// snapshot (§4.10 "Device-list poller").
#[derive(Debug, Clone)]
pub struct DeviceListUpdate {
    pub devices: Vec<DeviceInfo>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Unified subscription event emitted by the polling/push pipeline
/// (§4.10 "Unified event format").
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub source: crate::device::StateSource,
    pub timestamp: DateTime<Utc>,
    pub device_uuid: String,
    pub state: Value,
    pub changes: HashMap<String, HashMap<String, Value>>,
}

impl From<StateEvent> for PollEvent {
    fn from(event: StateEvent) -> Self {
        let mut changes = HashMap::new();
        let mut channel_map = HashMap::new();
        channel_map.insert(
            event.channel.map(|c| c.to_string()).unwrap_or_default(),
            event.value.clone(),
        );
        changes.insert(event.namespace, channel_map);

        PollEvent {
            source: event.source,
            timestamp: event.timestamp,
            device_uuid: String::new(),
            state: event.value,
            changes,
        }
    }
}

//! Device registry (C6): dual-indexed by native uuid (base devices
//! only) and by internal id (every device, including subdevices).

use std::collections::HashMap;
use std::sync::Arc;

use meross_protocol::abilities::Abilities;
use meross_protocol::device::{DeviceInfo, InternalId, OnlineStatus};
use tokio::sync::RwLock;

/// A registered device: its static record plus the abilities fetched
/// during enrollment (§4.11 step 4).
pub struct RegisteredDevice {
    pub info: DeviceInfo,
    pub abilities: Abilities,
}

/// Conjunctive filter set for [`DeviceRegistry::find`]. Every `Some`
/// field must match; `None` fields are ignored.
#[derive(Default)]
pub struct DeviceFilter<'a> {
    pub uuids: Option<&'a [String]>,
    pub internal_ids: Option<&'a [InternalId]>,
    pub device_type: Option<&'a str>,
    pub dev_name: Option<&'a str>,
    pub online_status: Option<OnlineStatus>,
    /// Capability tag resolved against abilities, never against
    /// `device_type` (§4.6: "must not depend on type strings").
    pub capability: Option<&'a str>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    by_uuid: RwLock<HashMap<String, Arc<RegisteredDevice>>>,
    by_internal_id: RwLock<HashMap<InternalId, Arc<RegisteredDevice>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. Idempotent on internal id: registering the
    /// same internal id again replaces the prior entry.
    pub async fn register(&self, info: DeviceInfo, abilities: Abilities) {
        let internal_id = info.internal_id();
        let uuid = info.uuid.clone();
        let device = Arc::new(RegisteredDevice { info, abilities });

        self.by_internal_id
            .write()
            .await
            .insert(internal_id.clone(), device.clone());

        if matches!(internal_id, InternalId::Base(_)) {
            self.by_uuid.write().await.insert(uuid, device);
        }
    }

    /// Drop a device from both indices. Disconnection is the caller's
    /// responsibility as part of a broader `clear` (§4.11 `disconnectAll`).
    pub async fn remove(&self, internal_id: &InternalId) {
        if let InternalId::Base(uuid) = internal_id {
            self.by_uuid.write().await.remove(uuid);
        }
        self.by_internal_id.write().await.remove(internal_id);
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Option<Arc<RegisteredDevice>> {
        self.by_uuid.read().await.get(uuid).cloned()
    }

    pub async fn get(&self, internal_id: &InternalId) -> Option<Arc<RegisteredDevice>> {
        self.by_internal_id.read().await.get(internal_id).cloned()
    }

    pub async fn clear(&self) {
        self.by_uuid.write().await.clear();
        self.by_internal_id.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.by_internal_id.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Conjunctive lookup across every registered device.
    pub async fn find(&self, filter: &DeviceFilter<'_>) -> Vec<Arc<RegisteredDevice>> {
        self.by_internal_id
            .read()
            .await
            .values()
            .filter(|device| Self::matches(device, filter))
            .cloned()
            .collect()
    }

    fn matches(device: &RegisteredDevice, filter: &DeviceFilter<'_>) -> bool {
        if let Some(uuids) = filter.uuids {
            if !uuids.iter().any(|u| u == &device.info.uuid) {
                return false;
            }
        }
        if let Some(ids) = filter.internal_ids {
            if !ids.iter().any(|id| id == &device.info.internal_id()) {
                return false;
            }
        }
        if let Some(device_type) = filter.device_type {
            if device.info.device_type != device_type {
                return false;
            }
        }
        if let Some(dev_name) = filter.dev_name {
            if device.info.dev_name != dev_name {
                return false;
            }
        }
        if let Some(status) = filter.online_status {
            if device.info.online_status() != status {
                return false;
            }
        }
        if let Some(tag) = filter.capability {
            if !Self::has_capability(device, tag) {
                return false;
            }
        }
        true
    }

    /// Capability detection by ability namespace presence, never by
    /// `device_type` string (§4.6).
    fn has_capability(device: &RegisteredDevice, tag: &str) -> bool {
        match tag {
            "light" => device.abilities.has(meross_protocol::abilities::LIGHT_ABILITY),
            "hub" => device.abilities.is_hub(),
            "rgb" => device.abilities.supports_rgb(),
            "temperature" => device.abilities.supports_temperature(),
            "luminance" => device.abilities.supports_luminance(),
            other => device.abilities.namespaces().any(|ns| ns.contains(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn device(uuid: &str) -> DeviceInfo {
        DeviceInfo {
            uuid: uuid.into(),
            dev_name: format!("dev-{uuid}"),
            device_type: "mss310".into(),
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

    #[tokio::test]
    async fn register_indexes_by_both_uuid_and_internal_id() {
        let registry = DeviceRegistry::new();
        registry.register(device("u1"), Abilities::default()).await;

        assert!(registry.get_by_uuid("u1").await.is_some());
        assert!(registry.get(&InternalId::base("u1")).await.is_some());
    }

    #[tokio::test]
    async fn subdevices_are_not_indexed_by_uuid() {
        let mut sub = device("hub1-s1");
        sub.hub_uuid = Some("hub1".into());
        sub.sub_device_id = Some("s1".into());

        let registry = DeviceRegistry::new();
        registry.register(sub, Abilities::default()).await;

        assert!(registry.get_by_uuid("hub1-s1").await.is_none());
        assert!(registry
            .get(&InternalId::sub("hub1", "s1"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn register_is_idempotent_on_internal_id() {
        let registry = DeviceRegistry::new();
        registry.register(device("u1"), Abilities::default()).await;
        let mut updated = device("u1");
        updated.dev_name = "renamed".into();
        registry.register(updated, Abilities::default()).await;

        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.get_by_uuid("u1").await.unwrap().info.dev_name,
            "renamed"
        );
    }

    #[tokio::test]
    async fn find_filters_by_capability_not_type_string() {
        let registry = DeviceRegistry::new();
        let mut abilities_map = StdHashMap::new();
        abilities_map.insert(
            meross_protocol::abilities::LIGHT_ABILITY.to_string(),
            serde_json::json!({"capacity": 1}),
        );
        registry
            .register(device("light1"), Abilities::from_map(abilities_map))
            .await;
        registry.register(device("plug1"), Abilities::default()).await;

        let found = registry
            .find(&DeviceFilter {
                capability: Some("light"),
                ..Default::default()
            })
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].info.uuid, "light1");
    }

    #[tokio::test]
    async fn clear_empties_both_indices() {
        let registry = DeviceRegistry::new();
        registry.register(device("u1"), Abilities::default()).await;
        registry.clear().await;
        assert!(registry.is_empty().await);
        assert!(registry.get_by_uuid("u1").await.is_none());
    }
}

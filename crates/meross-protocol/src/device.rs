//! Device identity and the device record (§3 "Device identity" / "Device record").

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device lifecycle status, with the exact numeric values the Meross
/// cloud API returns (preserved for wire compatibility).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum OnlineStatus {
    Unknown = -1,
    Connecting = 0,
    Online = 1,
    Offline = 2,
    Upgrading = 3,
}

impl OnlineStatus {
    pub fn from_code(code: i8) -> Self {
        match code {
            0 => OnlineStatus::Connecting,
            1 => OnlineStatus::Online,
            2 => OnlineStatus::Offline,
            3 => OnlineStatus::Upgrading,
            _ => OnlineStatus::Unknown,
        }
    }

    pub fn is_online(self) -> bool {
        matches!(self, OnlineStatus::Online)
    }
}

/// A control endpoint on a device. Index 0 is always the master channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub index: u8,
    pub name: String,
    pub is_master: bool,
    pub is_usb: bool,
}

/// Stable identity for a device or subdevice, unifying both forms for
/// a single registry (§3 "Device identity").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InternalId {
    /// A base device, addressed by its own UUID.
    Base(String),
    /// A subdevice hanging off a hub, addressed by (hub uuid, subdevice id).
    Sub { hub_uuid: String, sub_id: String },
}

impl InternalId {
    pub fn base(uuid: impl Into<String>) -> Self {
        InternalId::Base(uuid.into())
    }

    pub fn sub(hub_uuid: impl Into<String>, sub_id: impl Into<String>) -> Self {
        InternalId::Sub {
            hub_uuid: hub_uuid.into(),
            sub_id: sub_id.into(),
        }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalId::Base(uuid) => write!(f, "#BASE:{uuid}"),
            InternalId::Sub { hub_uuid, sub_id } => write!(f, "#SUB:{hub_uuid}:{sub_id}"),
        }
    }
}

/// MQTT broker host/port parsed from a device's `domain` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

const DEFAULT_MQTT_HOST: &str = "mqtt.meross.com";
const DEFAULT_MQTT_PORT: u16 = 443;

impl BrokerAddress {
    /// Parse `"host:port"`, falling back to `reserved_domain`, then to
    /// the hardcoded Meross default (§6 "HTTP device list API").
    pub fn resolve(domain: Option<&str>, reserved_domain: Option<&str>) -> Self {
        for candidate in [domain, reserved_domain].into_iter().flatten() {
            if let Some(addr) = Self::parse(candidate) {
                return addr;
            }
        }
        BrokerAddress {
            host: DEFAULT_MQTT_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match raw.split_once(':') {
            Some((host, port)) => port.parse::<u16>().ok().map(|port| BrokerAddress {
                host: host.to_string(),
                port,
            }),
            None => Some(BrokerAddress {
                host: raw.to_string(),
                port: DEFAULT_MQTT_PORT,
            }),
        }
    }
}

/// Core device record (§3 "Device record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub uuid: String,
    pub dev_name: String,
    pub device_type: String,
    pub fmware_version: String,
    pub hdware_version: String,
    pub domain: Option<String>,
    pub reserved_domain: Option<String>,
    #[serde(skip)]
    pub online_status: i8,
    pub lan_ip: Option<String>,
    pub mac_address: Option<String>,
    #[serde(default)]
    pub supports_encryption: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// uuid of the owning hub, if this is a subdevice.
    pub hub_uuid: Option<String>,
    /// subdevice id within the hub, if this is a subdevice.
    pub sub_device_id: Option<String>,
}

impl DeviceInfo {
    pub fn online_status(&self) -> OnlineStatus {
        OnlineStatus::from_code(self.online_status)
    }

    pub fn internal_id(&self) -> InternalId {
        match (&self.hub_uuid, &self.sub_device_id) {
            (Some(hub), Some(sub)) => InternalId::sub(hub.clone(), sub.clone()),
            _ => InternalId::base(self.uuid.clone()),
        }
    }

    pub fn is_subdevice(&self) -> bool {
        self.hub_uuid.is_some() && self.sub_device_id.is_some()
    }

    pub fn broker_address(&self) -> BrokerAddress {
        BrokerAddress::resolve(self.domain.as_deref(), self.reserved_domain.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_device() -> DeviceInfo {
        DeviceInfo {
            uuid: "u1".into(),
            dev_name: "Plug".into(),
            device_type: "mss310".into(),
            fmware_version: "1.0.0".into(),
            hdware_version: "2.0.0".into(),
            domain: None,
            reserved_domain: None,
            online_status: 1,
            lan_ip: Some("10.0.0.5".into()),
            mac_address: None,
            supports_encryption: false,
            channels: vec![],
            hub_uuid: None,
            sub_device_id: None,
        }
    }

    #[test]
    fn online_status_from_code() {
        assert_eq!(OnlineStatus::from_code(1), OnlineStatus::Online);
        assert_eq!(OnlineStatus::from_code(2), OnlineStatus::Offline);
        assert_eq!(OnlineStatus::from_code(99), OnlineStatus::Unknown);
    }

    #[test]
    fn internal_id_base_vs_sub() {
        let base = base_device();
        assert_eq!(base.internal_id().to_string(), "#BASE:u1");

        let mut sub = base_device();
        sub.uuid = "hub1-sub1".into();
        sub.hub_uuid = Some("hub1".into());
        sub.sub_device_id = Some("sub1".into());
        assert_eq!(sub.internal_id().to_string(), "#SUB:hub1:sub1");
        assert!(sub.is_subdevice());
    }

    #[test]
    fn broker_address_prefers_domain_over_reserved() {
        let addr = BrokerAddress::resolve(Some("mqtt-1.meross.com:2001"), Some("fallback:1111"));
        assert_eq!(addr.host, "mqtt-1.meross.com");
        assert_eq!(addr.port, 2001);
    }

    #[test]
    fn broker_address_falls_back_to_reserved() {
        let addr = BrokerAddress::resolve(None, Some("mqtt-2.meross.com:2001"));
        assert_eq!(addr.host, "mqtt-2.meross.com");
        assert_eq!(addr.port, 2001);
    }

    #[test]
    fn broker_address_falls_back_to_default() {
        let addr = BrokerAddress::resolve(None, None);
        assert_eq!(addr.host, DEFAULT_MQTT_HOST);
        assert_eq!(addr.port, DEFAULT_MQTT_PORT);
    }

    #[test]
    fn broker_address_host_without_port() {
        let addr = BrokerAddress::resolve(Some("mqtt-3.meross.com"), None);
        assert_eq!(addr.host, "mqtt-3.meross.com");
        assert_eq!(addr.port, DEFAULT_MQTT_PORT);
    }
}

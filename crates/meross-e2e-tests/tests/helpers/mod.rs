//! Shared test harness wiring a [`MerossManager`] to mock transports.

use std::sync::Arc;

use meross_manager::http_client::mock::MockApiClient;
use meross_manager::{ManagerOptions, MerossManager};
use meross_protocol::device::DeviceInfo;

pub fn device(uuid: &str, lan_ip: Option<&str>) -> DeviceInfo {
    DeviceInfo {
        uuid: uuid.to_string(),
        dev_name: format!("device-{uuid}"),
        device_type: "mss310".to_string(),
        fmware_version: "1.0.0".to_string(),
        hdware_version: "2.0.0".to_string(),
        domain: Some("mqtt-1.meross.com:2001".to_string()),
        reserved_domain: None,
        online_status: 1,
        lan_ip: lan_ip.map(|s| s.to_string()),
        mac_address: None,
        supports_encryption: false,
        channels: vec![],
        hub_uuid: None,
        sub_device_id: None,
    }
}

pub fn manager_with_devices(devices: Vec<DeviceInfo>) -> (Arc<MockApiClient>, MerossManager) {
    let mock = Arc::new(MockApiClient::default());
    for d in devices {
        mock.devices.try_lock().unwrap().push(d);
    }
    let manager = MerossManager::new(mock.clone(), ManagerOptions::default());
    (mock, manager)
}

//! MQTT topic builders and parsers for the Meross cloud topic hierarchy
//! (§3 "MQTT topics").
//!
//! ```text
//! /appliance/{deviceUuid}/subscribe       device inbound (publish target)
//! /app/{userId}-{appId}/subscribe         client response (our call acks)
//! /app/{userId}/subscribe                 client user (push notifications)
//! ```

/// Topic a command is published to, to reach a given device.
pub fn device_request(device_uuid: &str) -> String {
    format!("/appliance/{device_uuid}/subscribe")
}

/// Topic we subscribe to for acks to calls we issued.
pub fn client_response(user_id: &str, app_id: &str) -> String {
    format!("/app/{user_id}-{app_id}/subscribe")
}

/// Topic we subscribe to for device-originated push notifications.
pub fn client_user(user_id: &str) -> String {
    format!("/app/{user_id}/subscribe")
}

/// Extract the device UUID from an inbound `header.from` value — the
/// third path segment (§6 "Topic conventions").
pub fn device_uuid_from(from: &str) -> Option<&str> {
    from.split('/').nth(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_construction_matches_spec_s2() {
        assert_eq!(device_request("u1"), "/appliance/u1/subscribe");
        assert_eq!(client_response("42", "app7"), "/app/42-app7/subscribe");
        assert_eq!(client_user("42"), "/app/42/subscribe");
    }

    #[test]
    fn device_uuid_extraction() {
        assert_eq!(device_uuid_from("/appliance/u1/subscribe"), Some("u1"));
        assert_eq!(device_uuid_from("/app/42-app7/subscribe"), Some("42-app7"));
        assert_eq!(device_uuid_from("garbage"), None);
    }
}

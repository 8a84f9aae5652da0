//! Transport arbiter (C7): picks LAN HTTP or MQTT per the configured
//! mode, falling back to MQTT when LAN is unavailable or out of budget.

use std::sync::Arc;
use std::time::Duration;

use meross_protocol::device::DeviceInfo;
use meross_protocol::envelope::{Envelope, Method};
use meross_mqtt::lan::{self, LanError};
use meross_mqtt::pool::MqttPool;

use crate::error_budget::ErrorBudget;

/// Which transports a device is allowed to use, and in what order
/// (§4.7 "Mode matrix").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    MqttOnly,
    LanHttpFirst,
    LanHttpFirstOnlyGet,
}

impl TransportMode {
    /// Whether LAN should even be attempted for this (mode, method).
    fn lan_allowed(self, method: Method) -> bool {
        match self {
            TransportMode::MqttOnly => false,
            TransportMode::LanHttpFirst => true,
            TransportMode::LanHttpFirstOnlyGet => method == Method::GET,
        }
    }

    /// Whether a LAN transport failure should fall back to MQTT rather
    /// than propagate (both LAN-first variants permit fallback).
    fn permits_fallback(self) -> bool {
        matches!(
            self,
            TransportMode::LanHttpFirst | TransportMode::LanHttpFirstOnlyGet
        )
    }
}

pub const MAX_LAN_TIMEOUT: Duration = Duration::from_millis(1_000);

#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error(transparent)]
    Lan(#[from] LanError),
    #[error("no mqtt connection for domain {0}")]
    NoMqttConnection(String),
}

/// Outcome of a dispatch, distinguishing which transport actually
/// carried the envelope (relevant for correlating inbound replies).
pub enum Dispatched {
    Lan(Envelope),
    Mqtt,
}

/// Coordinates LAN vs MQTT for a single publish attempt.
pub struct TransportArbiter {
    error_budget: Arc<ErrorBudget>,
    pool: Arc<MqttPool>,
}

impl TransportArbiter {
    pub fn new(error_budget: Arc<ErrorBudget>, pool: Arc<MqttPool>) -> Self {
        Self { error_budget, pool }
    }

    /// Dispatch `envelope` for `device`, honouring `mode` and the
    /// session timeout. `mqtt_domain`/`mqtt_topic` identify the
    /// fallback (or sole) MQTT path.
    pub async fn dispatch(
        &self,
        device: &DeviceInfo,
        envelope: &Envelope,
        mode: TransportMode,
        session_timeout: Duration,
        mqtt_domain: &str,
        mqtt_topic: &str,
    ) -> Result<Dispatched, ArbiterError> {
        let method = envelope.header.method;

        if mode.lan_allowed(method) {
            if let Some(ip) = device.lan_ip.as_deref() {
                if !self.error_budget.is_out_of_budget(&device.uuid).await {
                    let lan_timeout = session_timeout.min(MAX_LAN_TIMEOUT);
                    match lan::send(ip, device, envelope, lan_timeout).await {
                        Ok(response) => return Ok(Dispatched::Lan(response.envelope)),
                        Err(LanError::ApplicationParse(e)) => {
                            tracing::warn!(
                                device = %device.uuid,
                                error = %e,
                                "lan response had an unparseable application payload, budget untouched"
                            );
                            return Err(LanError::ApplicationParse(e).into());
                        }
                        Err(err @ LanError::Transport(_)) => {
                            self.error_budget.notify_error(&device.uuid).await;
                            tracing::warn!(device = %device.uuid, error = %err, "lan transport failure");
                            if !mode.permits_fallback() {
                                return Err(err.into());
                            }
                            // fall through to MQTT
                        }
                    }
                } else {
                    tracing::debug!(device = %device.uuid, "lan budget exhausted, routing to mqtt");
                }
            }
        }

        let published = self
            .pool
            .publish(mqtt_domain, mqtt_topic, &serde_json::to_vec(envelope).unwrap_or_default())
            .await;
        if published {
            Ok(Dispatched::Mqtt)
        } else {
            Err(ArbiterError::NoMqttConnection(mqtt_domain.to_string()))
        }
    }
}

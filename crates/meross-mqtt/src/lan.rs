//! LAN HTTP transport (§4.8): POST straight to the device, bypassing
//! the cloud broker.

use std::time::Duration;

use meross_protocol::envelope::Envelope;
use meross_protocol::DeviceInfo;

use crate::codec;
use crate::error::TransportError;

/// Outcome of a LAN HTTP attempt, for the arbiter and for stats.
pub struct LanResponse {
    pub status: u16,
    pub envelope: Envelope,
}

/// A LAN attempt can fail two distinct ways that the arbiter must tell
/// apart (§4.7 rationale): a transport-level failure (network error,
/// non-2xx, crypto failure) spends the error budget; a post-200 parse
/// failure of the *application* payload does not, because the
/// transport itself proved healthy.
#[derive(Debug, thiserror::Error)]
pub enum LanError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device responded but its payload could not be parsed: {0}")]
    ApplicationParse(TransportError),
}

/// HTTP status used for network-level errors (no response at all) so
/// stats buckets stay consistent with real HTTP statuses.
pub const NETWORK_ERROR_STATUS: u16 = 0;

/// POST an envelope to `http://<ip>/config`. Encrypts the body first
/// when the device requires it (§4.1, §4.8).
pub async fn send(
    ip: &str,
    device: &DeviceInfo,
    envelope: &Envelope,
    timeout: Duration,
) -> Result<LanResponse, LanError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Http(e.to_string()))?;

    let url = format!("http://{ip}/config");

    let body = if codec::requires_encryption(device) {
        let plaintext = serde_json::to_vec(envelope)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        codec::encrypt(device, &plaintext)?
    } else {
        serde_json::to_vec(envelope).map_err(|e| TransportError::Serialization(e.to_string()))?
    };

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|_| TransportError::Http("network error".into()))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(TransportError::Http(format!("non-2xx status {status}")).into());
    }

    let raw = response
        .bytes()
        .await
        .map_err(|_| TransportError::Http("failed to read body".into()))?;

    let json_bytes = if codec::requires_encryption(device) {
        // §4.7: decryption failure is a transport-level failure (the
        // device/broker proved unreachable in a meaningful sense),
        // unlike a post-200 parse failure of already-plaintext JSON.
        let decrypted = codec::decrypt(device, &raw)?;
        codec::strip_trailing_nuls(&decrypted).to_vec()
    } else {
        raw.to_vec()
    };

    let envelope = codec::parse_inbound(&json_bytes).map_err(LanError::ApplicationParse)?;
    Ok(LanResponse { status, envelope })
}

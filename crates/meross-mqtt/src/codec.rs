//! Message codec (C1): build/sign outbound envelopes, verify inbound
//! signatures, encrypt/decrypt where supported, and parse raw bytes.
//!
//! Signing and the MQTT password formula are the literal Meross wire
//! formulas — see `other_examples/..._meross_mqtt.rs.rs` in the
//! retrieval pack for an independent confirmation of both.

use meross_protocol::envelope::{Envelope, Header, Method};
use meross_protocol::DeviceInfo;
use rand::Rng;
use serde_json::Value;

use crate::error::{TransportError, TransportResult};

const RANDOM_TOKEN_LEN: usize = 16;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a 16-char random token and MD5-hash it into the 32-char
/// lowercase hex `messageId` (§3 "Message envelope").
pub fn generate_message_id() -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..RANDOM_TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("{:x}", md5::compute(token.as_bytes()))
}

/// `sign = MD5(messageId ∥ userKey ∥ timestamp)`, lowercase hex (§3, S1).
pub fn compute_sign(message_id: &str, key: &str, timestamp: i64) -> String {
    let input = format!("{message_id}{key}{timestamp}");
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// `password = MD5(userId ∥ key)` for MQTT broker authentication (§3, §6).
pub fn mqtt_password(user_id: &str, key: &str) -> String {
    let input = format!("{user_id}{key}");
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// `appId = MD5("API" ∥ random-uuid)` (§3 "MQTT topics").
pub fn generate_app_id() -> String {
    let random = uuid::Uuid::new_v4();
    let input = format!("API{random}");
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Build an outbound envelope deterministically from explicit
/// `message_id`/`timestamp` — the form used by tests and by
/// [`encode`]'s production path.
pub fn encode_with(
    method: Method,
    namespace: &str,
    payload: Value,
    device_uuid: &str,
    from: &str,
    key: &str,
    message_id: String,
    timestamp: i64,
) -> Envelope {
    let sign = compute_sign(&message_id, key, timestamp);
    Envelope {
        header: Header {
            from: from.to_string(),
            message_id,
            method,
            namespace: namespace.to_string(),
            payload_version: Header::PAYLOAD_VERSION,
            sign,
            timestamp,
            trigger_src: Header::TRIGGER_SRC.to_string(),
            uuid: device_uuid.to_string(),
        },
        payload,
    }
}

/// Build an outbound envelope with a fresh `messageId` and the current
/// timestamp. Never blocks — no I/O.
pub fn encode(
    method: Method,
    namespace: &str,
    payload: Value,
    device_uuid: &str,
    from: &str,
    key: &str,
) -> Envelope {
    let timestamp = chrono::Utc::now().timestamp();
    encode_with(
        method,
        namespace,
        payload,
        device_uuid,
        from,
        key,
        generate_message_id(),
        timestamp,
    )
}

/// Recompute and case-insensitively compare `header.sign`.
pub fn verify_signature(header: &Header, key: &str) -> bool {
    let expected = compute_sign(&header.message_id, key, header.timestamp);
    expected.eq_ignore_ascii_case(&header.sign)
}

/// Parse a raw inbound payload into an envelope. Fails when the outer
/// structure or header fields are absent.
pub fn parse_inbound(bytes: &[u8]) -> TransportResult<Envelope> {
    serde_json::from_slice(bytes).map_err(|e| TransportError::Other(format!("parse error: {e}")))
}

/// Whether this device's traffic must be encrypted (§4.1).
pub fn requires_encryption(device: &DeviceInfo) -> bool {
    device.supports_encryption
}

/// Encrypt a plaintext payload for a device that requires it.
///
/// The device-side key derivation from `(uuid, mac, userKey)` is
/// referenced by the source protocol but not fully specified at the
/// call site (§9 open question 1); this implementation does not guess
/// it and returns an error so callers can surface "encryption
/// unsupported" rather than silently sending malformed ciphertext.
pub fn encrypt(device: &DeviceInfo, _plaintext: &[u8]) -> TransportResult<Vec<u8>> {
    if !requires_encryption(device) {
        return Err(TransportError::Encryption(
            "device does not advertise supportsEncryption".into(),
        ));
    }
    Err(TransportError::Encryption(
        "key derivation not implemented: unsupported behind supportsEncryption flag".into(),
    ))
}

/// Decrypt a ciphertext payload, stripping trailing NUL padding before
/// the caller JSON-parses it (§4.1).
pub fn decrypt(device: &DeviceInfo, _ciphertext: &[u8]) -> TransportResult<Vec<u8>> {
    if !requires_encryption(device) {
        return Err(TransportError::Encryption(
            "device does not advertise supportsEncryption".into(),
        ));
    }
    Err(TransportError::Encryption(
        "key derivation not implemented: unsupported behind supportsEncryption flag".into(),
    ))
}

/// Strip trailing NUL padding from a decrypted payload before JSON
/// parsing (§4.1).
pub fn strip_trailing_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

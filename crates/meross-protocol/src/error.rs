//! Error taxonomy (§7) shared across the manager's crates.

use thiserror::Error;

/// A device whose command timed out or returned an error carries a
/// short descriptor of what was being attempted, for diagnostics.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub namespace: String,
    pub method: String,
}

impl std::fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.namespace)
    }
}

/// Domain/MQTT-domain pair a `BadDomain` error carries so the caller can
/// retry against the corrected endpoints (§7, §9 open question 2).
#[derive(Debug, Clone)]
pub struct BadDomainInfo {
    pub api_domain: String,
    pub mqtt_domain: String,
}

#[derive(Debug, Error)]
pub enum MerossError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("http api error (status {status}): {message}")]
    HttpApi {
        status: u16,
        message: String,
        api_code: Option<i32>,
    },

    #[error("bad domain: retry against {info:?}")]
    BadDomain { info: BadDomainInfo },

    #[error("network timeout after {0}ms")]
    NetworkTimeout(u64),

    #[error("command timeout for device {device_uuid} ({descriptor}) after {deadline_ms}ms")]
    CommandTimeout {
        device_uuid: String,
        deadline_ms: u64,
        descriptor: CommandDescriptor,
    },

    #[error("device returned error: {0}")]
    Command(serde_json::Value),

    #[error("mqtt error: {0}")]
    Mqtt(String),

    #[error("no live transport for device {0}")]
    Unconnected(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("operation locked")]
    OperationLocked,

    #[error("api limit reached")]
    ApiLimitReached,

    #[error("resource access denied")]
    ResourceAccessDenied,

    #[error("initialization error: {0}")]
    Initialization(String),

    #[error("cancelled")]
    Cancelled,
}

/// Centralised mapping from numeric Meross API error codes to error
/// kinds (§7 "Mapping from numeric API codes..."). Unknown codes map
/// to a generic `HttpApi` with the code preserved.
///
/// `bad_domain` carries the `apiDomain`/`mqttDomain` pair the caller
/// parsed from the response body, when the code is 1030 and the body
/// actually included them; falls back to a generic `HttpApi` if code
/// 1030 arrives without a parseable domain pair.
pub fn map_api_error_code(
    code: i32,
    message: impl Into<String>,
    status: u16,
    bad_domain: Option<BadDomainInfo>,
) -> MerossError {
    let message = message.into();
    match code {
        1028 => MerossError::RateLimit,
        1035 => MerossError::OperationLocked,
        1042 => MerossError::ApiLimitReached,
        1043 => MerossError::ResourceAccessDenied,
        1030 => match bad_domain {
            Some(info) => MerossError::BadDomain { info },
            None => MerossError::HttpApi {
                status,
                message,
                api_code: Some(code),
            },
        },
        _ => MerossError::HttpApi {
            status,
            message,
            api_code: Some(code),
        },
    }
}

pub type MerossResult<T> = Result<T, MerossError>;

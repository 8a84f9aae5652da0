//! Injected HTTP API client boundary (§4.11, §6 "HTTP device list
//! API"): the manager depends on this trait rather than talking to
//! `reqwest` directly, so orchestration can be tested without a real
//! cloud endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meross_protocol::device::DeviceInfo;
use meross_protocol::error::MerossResult;
use serde_json::Value;

/// Credentials obtained from a successful login, reusable across a
/// session and returned by `get_token_data` (§4.11).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub key: String,
    pub user_id: String,
    pub user_email: String,
    pub domain: String,
    pub mqtt_domain: String,
    pub issued_on: DateTime<Utc>,
}

#[async_trait]
pub trait HttpApiClient: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> MerossResult<Credentials>;
    async fn logout(&self) -> MerossResult<()>;
    async fn device_list(&self) -> MerossResult<Vec<DeviceInfo>>;
    async fn subdevice_list(&self, hub_uuid: &str) -> MerossResult<Vec<DeviceInfo>>;
    fn credentials(&self) -> Option<Credentials>;
}

/// Default implementation backed by `reqwest`, talking to the Meross
/// cloud HTTP API (§6).
pub struct ReqwestApiClient {
    base_url: String,
    client: reqwest::Client,
    credentials: tokio::sync::RwLock<Option<Credentials>>,
}

impl ReqwestApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            credentials: tokio::sync::RwLock::new(None),
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> MerossResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| meross_protocol::error::MerossError::HttpApi {
                status: 0,
                message: e.to_string(),
                api_code: None,
            })?;

        let status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|e| meross_protocol::error::MerossError::Parse(e.to_string()))?;

        let code = body.get("apiStatus").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        if code != 0 {
            let message = body
                .get("info")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();

            // §7 BadDomain (1030): the corrected endpoints travel in
            // `data.apiDomain`/`data.mqttDomain`, same nesting as a
            // successful login payload.
            let bad_domain = (code == 1030)
                .then(|| body.get("data"))
                .flatten()
                .and_then(|data| {
                    let api_domain = data.get("apiDomain")?.as_str()?.to_string();
                    let mqtt_domain = data.get("mqttDomain")?.as_str()?.to_string();
                    Some(meross_protocol::error::BadDomainInfo {
                        api_domain,
                        mqtt_domain,
                    })
                });

            return Err(meross_protocol::error::map_api_error_code(
                code, message, status, bad_domain,
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl HttpApiClient for ReqwestApiClient {
    async fn login(&self, email: &str, password: &str) -> MerossResult<Credentials> {
        let body = self
            .post_json(
                "/v1/Auth/Login",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let credentials = Credentials {
            token: data.get("token").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            key: data.get("key").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            user_id: data.get("userid").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            user_email: email.to_string(),
            domain: data.get("domain").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            mqtt_domain: data
                .get("mqttDomain")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            issued_on: Utc::now(),
        };
        *self.credentials.write().await = Some(credentials.clone());
        Ok(credentials)
    }

    async fn logout(&self) -> MerossResult<()> {
        self.post_json("/v1/Profile/logout", serde_json::json!({})).await?;
        *self.credentials.write().await = None;
        Ok(())
    }

    async fn device_list(&self) -> MerossResult<Vec<DeviceInfo>> {
        let body = self
            .post_json("/v1/Device/devList", serde_json::json!({}))
            .await?;
        let data = body.get("data").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(data).map_err(|e| meross_protocol::error::MerossError::Parse(e.to_string()))
    }

    async fn subdevice_list(&self, hub_uuid: &str) -> MerossResult<Vec<DeviceInfo>> {
        let body = self
            .post_json(
                "/v1/Hub/getSubDevices",
                serde_json::json!({ "uuid": hub_uuid }),
            )
            .await?;
        let data = body.get("data").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(data).map_err(|e| meross_protocol::error::MerossError::Parse(e.to_string()))
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials.try_read().ok().and_then(|c| c.clone())
    }
}

/// In-memory [`HttpApiClient`] for manager orchestration tests,
/// mirroring `meross_mqtt::mock::MockChannel`'s always-available shape.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    /// In-memory `HttpApiClient` for manager orchestration tests.
    #[derive(Default)]
    pub struct MockApiClient {
        pub devices: Mutex<Vec<DeviceInfo>>,
        pub subdevices: Mutex<std::collections::HashMap<String, Vec<DeviceInfo>>>,
        pub credentials: Mutex<Option<Credentials>>,
        pub fail_login: Mutex<bool>,
        /// When set, the next `login()` call fails with `BadDomain`
        /// reporting `bad_domain_target`, then clears itself so the
        /// retry that follows succeeds.
        pub fail_bad_domain_once: Mutex<bool>,
        pub bad_domain_target: Mutex<Option<(String, String)>>,
    }

    #[async_trait]
    impl HttpApiClient for MockApiClient {
        async fn login(&self, _email: &str, _password: &str) -> MerossResult<Credentials> {
            if *self.fail_login.lock().await {
                return Err(meross_protocol::error::MerossError::Authentication(
                    "invalid credentials".into(),
                ));
            }
            {
                let mut fail_once = self.fail_bad_domain_once.lock().await;
                if *fail_once {
                    *fail_once = false;
                    let (api_domain, mqtt_domain) = self
                        .bad_domain_target
                        .lock()
                        .await
                        .clone()
                        .unwrap_or_else(|| ("api-2.meross.com".into(), "mqtt-2.meross.com:2001".into()));
                    return Err(meross_protocol::error::MerossError::BadDomain {
                        info: meross_protocol::error::BadDomainInfo {
                            api_domain,
                            mqtt_domain,
                        },
                    });
                }
            }
            let credentials = Credentials {
                token: "tok".into(),
                key: "key".into(),
                user_id: "user1".into(),
                user_email: "a@b.com".into(),
                domain: "api.meross.com".into(),
                mqtt_domain: "mqtt.meross.com:2001".into(),
                issued_on: Utc::now(),
            };
            *self.credentials.lock().await = Some(credentials.clone());
            Ok(credentials)
        }

        async fn logout(&self) -> MerossResult<()> {
            *self.credentials.lock().await = None;
            Ok(())
        }

        async fn device_list(&self) -> MerossResult<Vec<DeviceInfo>> {
            Ok(self.devices.lock().await.clone())
        }

        async fn subdevice_list(&self, hub_uuid: &str) -> MerossResult<Vec<DeviceInfo>> {
            Ok(self
                .subdevices
                .lock()
                .await
                .get(hub_uuid)
                .cloned()
                .unwrap_or_default())
        }

        fn credentials(&self) -> Option<Credentials> {
            self.credentials.try_lock().ok().and_then(|c| c.clone())
        }
    }
}

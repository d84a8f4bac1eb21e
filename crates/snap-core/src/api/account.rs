use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ApiClient, ApiError, ApiResult};

/// Profile record stored on first login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub account: String,
}

/// Profile as returned by `GET /profile`; fields beyond the basics are kept verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteProfile {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of a mutating call: `{"status": "success"}` or a status plus message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".into(),
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Human readable failure reason.
    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => format!("{}: {message}", self.status),
            _ => self.status.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    #[serde(default)]
    valid: bool,
}

/// Account calls the login flow needs from the service.
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Account name of the logged-in user, `None` before provisioning.
    async fn get_account(&self) -> ApiResult<Option<String>>;
    async fn validate_account(&self, account: &str) -> ApiResult<bool>;
    async fn create_account(&self, account: &str) -> ApiResult<StatusResponse>;
    async fn store_profile(&self, profile: &Profile) -> ApiResult<StatusResponse>;
}

impl ApiClient {
    pub async fn get_profile(&self) -> ApiResult<RemoteProfile> {
        self.send_json(Method::GET, self.endpoint("/profile")?, None)
            .await
    }
}

#[async_trait]
impl AccountApi for ApiClient {
    async fn get_account(&self) -> ApiResult<Option<String>> {
        match self.get_profile().await {
            Ok(profile) => Ok(profile.account.filter(|account| !account.is_empty())),
            Err(ApiError::HttpStatus {
                status: StatusCode::NOT_FOUND,
                ..
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn validate_account(&self, account: &str) -> ApiResult<bool> {
        let mut url = self.endpoint("/validateaccount")?;
        url.query_pairs_mut().append_pair("account", account);
        let response: ValidationResponse = self.send_json(Method::GET, url, None).await?;
        Ok(response.valid)
    }

    async fn create_account(&self, account: &str) -> ApiResult<StatusResponse> {
        let url = self.endpoint_with_segments("/validateaccount", &[account])?;
        self.send_json(Method::POST, url, Some(Vec::new())).await
    }

    async fn store_profile(&self, profile: &Profile) -> ApiResult<StatusResponse> {
        let payload = serde_json::to_vec(profile)?;
        self.send_json(Method::POST, self.endpoint("/profile")?, Some(payload))
            .await
    }
}

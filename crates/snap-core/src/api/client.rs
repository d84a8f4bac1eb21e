use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::SessionConfig;

const USER_AGENT: &str = concat!("snap/", env!("CARGO_PKG_VERSION"));
const HTML_PREFIX: &[u8] = b"<!doctype html>";

/// Errors returned by the SnapMaster API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("login required before executing this command")]
    NotLoggedIn,
    #[error("API URL required but not found")]
    MissingApiUrl,
    #[error("invalid API URL '{0}'")]
    InvalidBaseUrl(String),
    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not execute HTTP request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token expired; please log in again")]
    TokenExpired,
    #[error("HTTP status {status} body: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Failed(String),
    #[error("failed to deserialize response: {0}")]
    Deserialize(#[from] serde_json::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Bearer-authenticated client for the SnapMaster REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    auth_header: String,
}

impl ApiClient {
    /// Build a client from the persisted session; fails when nobody is logged in.
    pub fn from_config(config: &SessionConfig) -> ApiResult<Self> {
        if !config.is_logged_in() {
            return Err(ApiError::NotLoggedIn);
        }
        Self::with_base_url(&config.api_url, &config.access_token)
    }

    pub fn with_base_url(base_url: &str, access_token: &str) -> ApiResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ApiError::MissingApiUrl);
        }
        if Url::parse(base_url)?.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_owned()));
        }
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url: base_url.to_owned(),
            auth_header: format!("Bearer {access_token}"),
        })
    }

    pub(crate) fn endpoint(&self, path: &str) -> ApiResult<Url> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    /// `path` followed by `segments`, each percent-encoded on its own.
    pub(crate) fn endpoint_with_segments(&self, path: &str, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.endpoint(path)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.clone()))?
            .extend(segments);
        Ok(url)
    }

    pub(crate) async fn send_json<R>(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let bytes = self.call(method, url, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn call(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> ApiResult<Vec<u8>> {
        debug!(%method, %url, "calling snap API");
        let mut request = self
            .http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.auth_header);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::TokenExpired);
        }

        let bytes = response.bytes().await?;
        // An HTML page instead of JSON means the request was bounced to a login screen.
        if is_html(&bytes) {
            return Err(ApiError::TokenExpired);
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}

fn is_html(body: &[u8]) -> bool {
    body.len() >= HTML_PREFIX.len() && body[..HTML_PREFIX.len()].eq_ignore_ascii_case(HTML_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::with_base_url(&server.base_url(), "token-1").unwrap()
    }

    #[test]
    fn requires_login() {
        let config = SessionConfig::default();
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(ApiError::NotLoggedIn)
        ));
    }

    #[test]
    fn requires_api_url() {
        let config = SessionConfig {
            access_token: "abc".into(),
            api_url: "  ".into(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            ApiClient::from_config(&config),
            Err(ApiError::MissingApiUrl)
        ));
    }

    #[tokio::test]
    async fn get_sends_bearer_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/snaps")
                    .header("authorization", "Bearer token-1");
                then.status(200).body(r#"[{"snapId":"demo/hello"}]"#);
            })
            .await;

        let client = client(&server);
        let body: serde_json::Value = client
            .send_json(Method::GET, client.endpoint("/snaps").unwrap(), None)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(body[0]["snapId"], "demo/hello");
    }

    #[tokio::test]
    async fn post_sends_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/snaps")
                    .header("content-type", "application/json")
                    .body(r#"{"action":"fork"}"#);
                then.status(200).body(r#"{"status":"success"}"#);
            })
            .await;

        let client = client(&server);
        let _: serde_json::Value = client
            .send_json(
                Method::POST,
                client.endpoint("/snaps").unwrap(),
                Some(br#"{"action":"fork"}"#.to_vec()),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_means_expired_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/profile");
                then.status(401);
            })
            .await;

        let err = client(&server).get_profile().await.unwrap_err();
        assert!(matches!(err, ApiError::TokenExpired));
    }

    #[tokio::test]
    async fn html_body_means_expired_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/profile");
                then.status(200)
                    .body("<!DOCTYPE html><html><body>login</body></html>");
            })
            .await;

        let err = client(&server).get_profile().await.unwrap_err();
        assert!(matches!(err, ApiError::TokenExpired));
    }

    #[tokio::test]
    async fn server_error_keeps_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/profile");
                then.status(500).body("boom");
            })
            .await;

        match client(&server).get_profile().await.unwrap_err() {
            ApiError::HttpStatus { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn segment_is_percent_encoded() {
        let client = ApiClient::with_base_url("https://www.snapmaster.io/", "t").unwrap();
        let url = client
            .endpoint_with_segments("/validateaccount", &["a b/c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.snapmaster.io/validateaccount/a%20b%2Fc"
        );
    }
}

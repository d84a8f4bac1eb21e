use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::pkce::CHALLENGE_METHOD;
use super::{AuthError, PkcePair};

pub const DEFAULT_AUDIENCE: &str = "https://api.snapmaster.io";
pub const DEFAULT_SCOPES: &[&str; 3] = &["openid", "profile", "email"];

const USER_AGENT: &str = concat!("snap/", env!("CARGO_PKG_VERSION"));
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth client settings for one login attempt.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Sent verbatim; must match the callback registered with the provider.
    pub redirect_uri: String,
    pub audience: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            audience: DEFAULT_AUDIENCE.to_owned(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Identity provider endpoints used by the flow.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
}

impl OAuthEndpoints {
    /// Auth0-style endpoints hosted on `domain` (e.g. `snapmaster.auth0.com`).
    pub fn for_domain(domain: &str) -> Result<Self, AuthError> {
        let base = Url::parse(&format!("https://{}/", domain.trim_end_matches('/')))?;
        Ok(Self {
            authorization_url: base.join("authorize")?,
            token_url: base.join("oauth/token")?,
        })
    }
}

/// Tokens returned by a successful authorization-code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Builds authorization requests and performs token exchanges.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
}

impl OAuthClient {
    pub fn with_endpoints(
        config: OAuthConfig,
        endpoints: OAuthEndpoints,
    ) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            config,
            endpoints,
        })
    }

    pub fn authorization_url(&self, pkce: &PkcePair) -> Url {
        let mut url = self.endpoints.authorization_url.clone();
        url.query_pairs_mut()
            .append_pair("audience", &self.config.audience)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD)
            .append_pair("redirect_uri", &self.config.redirect_uri);
        url
    }

    /// Trade an authorization code and the matching verifier for tokens.
    ///
    /// Codes are single use, so callers must not retry on failure.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce: &PkcePair,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", pkce.verifier()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        debug!(token_url = %self.endpoints.token_url, "exchanging authorization code");
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&form)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| AuthError::InvalidTokenResponse(err.to_string()))
    }
}

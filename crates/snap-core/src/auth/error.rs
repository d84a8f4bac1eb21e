use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::api::ApiError;
use crate::config::ConfigError;

/// Errors surfaced by the login flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client ID is not configured; run `snap config set --client-id <id>`")]
    MissingClientId,
    #[error("auth domain is not configured; run `snap config set --auth-domain <domain>`")]
    MissingAuthDomain,
    #[error("bad redirect URL '{url}': {reason}")]
    InvalidRedirectUri { url: String, reason: String },
    #[error("secure random source unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("can't listen to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("can't open browser to URL {url}: {reason}")]
    BrowserLaunch { url: Url, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("no authorization callback received within {0:?}")]
    CallbackTimeout(Duration),
    #[error("invalid authorization callback: {0}")]
    InvalidCallback(String),
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("authorization callback is missing the 'code' parameter")]
    MissingAuthorizationCode,
    #[error("could not get access token: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("could not parse token response: {0}")]
    InvalidTokenResponse(String),
    #[error("could not parse identity token: {0}")]
    ClaimDecode(String),
    #[error("could not store access token: {0}")]
    Persistence(#[from] ConfigError),
}

impl AuthError {
    /// Whether the failure happened while trading the code for tokens.
    pub fn is_token_exchange(&self) -> bool {
        matches!(
            self,
            AuthError::Http(_) | AuthError::TokenEndpoint { .. } | AuthError::InvalidTokenResponse(_)
        )
    }

    /// Plain-text body returned to the browser when the callback fails.
    pub(crate) fn browser_message(&self) -> String {
        match self {
            AuthError::MissingAuthorizationCode => {
                "Error: could not find 'code' URL parameter\n".to_owned()
            }
            AuthError::AccessDenied(reason) => {
                format!("Error: authorization was denied ({reason})\n")
            }
            AuthError::ClaimDecode(_) => "Error: could not read identity token\n".to_owned(),
            AuthError::Persistence(_) => "Error: could not store access token\n".to_owned(),
            err if err.is_token_exchange() => {
                "Error: could not retrieve access token\n".to_owned()
            }
            _ => "Error: login failed; check the snap CLI for details\n".to_owned(),
        }
    }
}

/// Errors from the first-login account provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no account name entered")]
    InputClosed,
    #[error("no valid account name after {0} attempts")]
    TooManyAttempts(usize),
    #[error(
        "could not create account name '{account}' ({message}); please complete the account creation via the web app at {web_app}"
    )]
    AccountCreation {
        account: String,
        message: String,
        web_app: String,
    },
    #[error(
        "error creating profile ({message}); please complete the account creation via the web app at {web_app}"
    )]
    ProfileStorage { message: String, web_app: String },
}

pub mod browser;
mod callback;
mod claims;
mod error;
mod flow;
mod oauth;
pub mod pkce;
mod provision;

pub use callback::{CallbackConnection, CallbackListener, CallbackRequest};
pub use claims::{decode_identity, Identity};
pub use error::{AuthError, ProvisionError};
pub use flow::{AuthFlow, LoginResult};
pub use oauth::{
    OAuthClient, OAuthConfig, OAuthEndpoints, TokenResponse, DEFAULT_AUDIENCE, DEFAULT_SCOPES,
};
pub use pkce::PkcePair;
pub use provision::{AccountStatus, Provisioner};

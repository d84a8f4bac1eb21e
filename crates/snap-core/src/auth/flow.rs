use std::time::Duration;

use tracing::{debug, error, info, warn};
use url::Url;

use super::callback::{CallbackListener, CallbackRequest};
use super::{browser, claims, AuthError, Identity, OAuthClient, OAuthConfig, OAuthEndpoints, PkcePair};
use crate::config::{ConfigStore, SessionConfig};

/// Result of a completed login.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub identity: Identity,
    /// The session as persisted, access token included.
    pub session: SessionConfig,
}

/// Drives the PKCE login and logout against an explicit configuration.
pub struct AuthFlow<S> {
    store: S,
    config: SessionConfig,
    endpoints: Option<OAuthEndpoints>,
    open_browser: bool,
    callback_timeout: Option<Duration>,
}

impl<S> AuthFlow<S>
where
    S: ConfigStore,
{
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            endpoints: None,
            open_browser: true,
            callback_timeout: None,
        }
    }

    /// Use these endpoints instead of the ones derived from the auth domain.
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Give up waiting for the browser redirect after `timeout`. No limit by default.
    pub fn with_callback_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the authorization-code flow and persist the resulting session.
    ///
    /// `notify_authorization_url` is told the URL before the browser is
    /// launched, so the user can open it by hand.
    pub async fn login<F>(&mut self, notify_authorization_url: F) -> Result<LoginResult, AuthError>
    where
        F: Fn(&Url) -> Result<(), AuthError>,
    {
        if self.config.client_id.trim().is_empty() {
            return Err(AuthError::MissingClientId);
        }
        if self.config.auth_domain.trim().is_empty() {
            return Err(AuthError::MissingAuthDomain);
        }

        let pkce = PkcePair::generate()?;
        let endpoints = match &self.endpoints {
            Some(endpoints) => endpoints.clone(),
            None => OAuthEndpoints::for_domain(&self.config.auth_domain)?,
        };
        let listener = CallbackListener::bind(&self.config.redirect_url).await?;
        let oauth = OAuthClient::with_endpoints(
            OAuthConfig::new(self.config.client_id.clone(), listener.redirect_uri()),
            endpoints,
        )?;
        let auth_url = oauth.authorization_url(&pkce);

        notify_authorization_url(&auth_url)?;
        if self.open_browser {
            browser::open(&auth_url)?;
        }

        let mut connection = listener.accept(self.callback_timeout).await?;
        let outcome = self
            .complete_authorization(&oauth, &pkce, connection.request().clone())
            .await;

        match &outcome {
            Ok(identity) => connection.respond_success(&identity.name).await,
            Err(err) => {
                warn!(error = %err, "authorization callback failed");
                connection.respond_failure(err).await;
            }
        }
        listener.close(connection);

        let identity = outcome?;
        info!(email = %identity.email, "logged in");
        Ok(LoginResult {
            identity,
            session: self.config.clone(),
        })
    }

    async fn complete_authorization(
        &mut self,
        oauth: &OAuthClient,
        pkce: &PkcePair,
        request: CallbackRequest,
    ) -> Result<Identity, AuthError> {
        let code = request.into_code().map_err(|err| {
            if matches!(err, AuthError::MissingAuthorizationCode) {
                error!("url param 'code' is missing");
            }
            err
        })?;

        let tokens = oauth.exchange_code(&code, pkce).await?;
        let identity = claims::decode_identity(&tokens.id_token)?;
        debug!(name = %identity.name, "decoded identity token");

        let mut session = self.config.clone();
        session.access_token = tokens.access_token;
        session.name = identity.name.clone();
        session.email = identity.email.clone();
        self.store.save(&session)?;
        self.config = session;

        Ok(identity)
    }

    /// Forget the local session. The server is not contacted.
    pub fn logout(&mut self) -> Result<(), AuthError> {
        let mut session = self.config.clone();
        session.clear_session();
        self.store.save(&session)?;
        self.config = session;
        debug!("cleared local session");
        Ok(())
    }
}

use std::io::{BufRead, Write};

use tracing::{debug, info};

use super::{Identity, ProvisionError};
use crate::api::{AccountApi, Profile};

/// Result of making sure the logged-in identity owns an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStatus {
    Existing(String),
    Created(String),
}

/// Walks a first-time user through choosing an account name.
pub struct Provisioner<'a, A, R, W> {
    api: &'a A,
    input: R,
    output: W,
    web_app_url: String,
    max_attempts: Option<usize>,
}

impl<'a, A, R, W> Provisioner<'a, A, R, W>
where
    A: AccountApi,
    R: BufRead,
    W: Write,
{
    /// `web_app_url` is where the user is sent when provisioning cannot finish here.
    pub fn new(api: &'a A, input: R, output: W, web_app_url: impl Into<String>) -> Self {
        Self {
            api,
            input,
            output,
            web_app_url: web_app_url.into(),
            max_attempts: None,
        }
    }

    /// Stop re-prompting after `attempts` rejected names. Unlimited by default.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Provision an account unless the service already has one for this identity.
    pub async fn ensure_account(
        &mut self,
        identity: &Identity,
    ) -> Result<AccountStatus, ProvisionError> {
        if let Some(account) = self.api.get_account().await? {
            debug!(%account, "account already provisioned");
            return Ok(AccountStatus::Existing(account));
        }
        let account = self.provision(identity).await?;
        Ok(AccountStatus::Created(account))
    }

    /// Prompt for a name until the service accepts one, then create the account and profile.
    pub async fn provision(&mut self, identity: &Identity) -> Result<String, ProvisionError> {
        write!(
            self.output,
            "\nHi {}, welcome to SnapMaster!\n\
             First things first: please select an account (tenant) name, so we can set\n\
             things up for you.\n\n\
             Your account will be part of the namespace that will identify your snaps,\n\
             much like your github account is used to name your repos. You can't change it\n\
             later, so pick a good one!\n\n\
             Account names must start with a letter and must be entirely composed of\n\
             alphanumeric characters, with a 20 character limit.\n\n\
             Enter account name: ",
            identity.name
        )?;
        self.output.flush()?;

        let account = self.choose_account().await?;

        let created = self.api.create_account(&account).await?;
        if !created.is_success() {
            return Err(ProvisionError::AccountCreation {
                account,
                message: created.describe(),
                web_app: self.web_app_url.clone(),
            });
        }

        let profile = Profile {
            name: identity.name.clone(),
            email: identity.email.clone(),
            account: account.clone(),
        };
        let stored = self.api.store_profile(&profile).await?;
        if !stored.is_success() {
            return Err(ProvisionError::ProfileStorage {
                message: stored.describe(),
                web_app: self.web_app_url.clone(),
            });
        }
        info!(%account, "account provisioned");

        write!(
            self.output,
            "Account successfully created!\n\n\
             Some things to try next:\n\n\
             $ snap gallery list   # will list snaps in the gallery\n\
             $ snap tools list     # will list available tools to connect to\n\
             $ snap connect <tool> # will guide you through connecting a tool\n\n\
             Also, be sure to check out {} for the GUI experience ;)\n",
            self.web_app_url
        )?;
        self.output.flush()?;
        Ok(account)
    }

    async fn choose_account(&mut self) -> Result<String, ProvisionError> {
        let mut rejected = 0usize;
        loop {
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ProvisionError::InputClosed);
            }
            let account = line.trim().to_owned();

            if !account.is_empty() && self.api.validate_account(&account).await? {
                return Ok(account);
            }

            rejected += 1;
            debug!(%account, rejected, "account name rejected");
            if self.max_attempts.is_some_and(|max| rejected >= max) {
                return Err(ProvisionError::TooManyAttempts(rejected));
            }
            write!(
                self.output,
                "Unfortunately, account name '{account}' is either invalid or already taken.\n\
                 Please try another name: "
            )?;
            self.output.flush()?;
        }
    }
}

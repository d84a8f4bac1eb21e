use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CLIENT_ID: &str = "O4e0z2Ky5DSvjzw3N5YLgtrz1GGltkOb";
pub const DEFAULT_API_URL: &str = "https://www.snapmaster.io";
pub const DEFAULT_AUTH_DOMAIN: &str = "snapmaster.auth0.com";
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8085";

const CONFIG_FILE_NAME: &str = "config.json";
const ENV_PREFIX: &str = "SNAP_";

/// Locates the `$HOME/.config/snap` directory holding the CLI configuration.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = BaseDirs::new().ok_or(ConfigError::MissingHomeDir)?;
        let root = dirs.home_dir().join(".config").join("snap");
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    #[cfg(test)]
    pub(crate) fn from_root_for_tests(root: PathBuf) -> Self {
        Self { root }
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Named deployments the CLI can be pointed at with `snap config set <env>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

/// Endpoint settings plus the locally persisted session credential.
///
/// The field names on disk match the keys written by earlier releases of the
/// CLI; lowercase aliases are accepted because some writers folded case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "AccessToken", alias = "accesstoken", default)]
    pub access_token: String,
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Email", alias = "email", default)]
    pub email: String,
    #[serde(rename = "ClientID", alias = "clientid", default = "default_client_id")]
    pub client_id: String,
    #[serde(rename = "APIURL", alias = "apiurl", default = "default_api_url")]
    pub api_url: String,
    #[serde(rename = "AuthDomain", alias = "authdomain", default = "default_auth_domain")]
    pub auth_domain: String,
    #[serde(rename = "RedirectURL", alias = "redirecturl", default = "default_redirect_url")]
    pub redirect_url: String,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_owned()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

fn default_auth_domain() -> String {
    DEFAULT_AUTH_DOMAIN.to_owned()
}

fn default_redirect_url() -> String {
    DEFAULT_REDIRECT_URL.to_owned()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            name: String::new(),
            email: String::new(),
            client_id: default_client_id(),
            api_url: default_api_url(),
            auth_domain: default_auth_domain(),
            redirect_url: default_redirect_url(),
        }
    }
}

impl SessionConfig {
    /// A non-empty access token is the only signal of a logged-in user.
    pub fn is_logged_in(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Forget the access token and identity, keeping endpoint settings.
    pub fn clear_session(&mut self) {
        self.access_token.clear();
        self.name.clear();
        self.email.clear();
    }

    pub fn apply_environment(&mut self, environment: Environment) {
        let (client_id, api_url, auth_domain) = match environment {
            Environment::Dev => (
                "f9BSuAhmF8dmUtJWZyjAVJbGJWQMKsMW",
                "https://dev.snapmaster.io",
                "snapmaster-dev.auth0.com",
            ),
            Environment::Prod => (DEFAULT_CLIENT_ID, DEFAULT_API_URL, DEFAULT_AUTH_DOMAIN),
        };
        self.client_id = client_id.to_owned();
        self.api_url = api_url.to_owned();
        self.auth_domain = auth_domain.to_owned();
    }

    /// Override settings from `SNAP_*` variables (e.g. `SNAP_APIURL`).
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`; empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 5] = [
            ("ACCESSTOKEN", &mut self.access_token),
            ("CLIENTID", &mut self.client_id),
            ("APIURL", &mut self.api_url),
            ("AUTHDOMAIN", &mut self.auth_domain),
            ("REDIRECTURL", &mut self.redirect_url),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(&format!("{ENV_PREFIX}{key}")) {
                if !value.trim().is_empty() {
                    *field = value;
                }
            }
        }
    }
}

/// Persistence abstraction for the CLI configuration and session credential.
pub trait ConfigStore {
    fn load(&self) -> Result<SessionConfig, ConfigError>;
    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError>;
}

/// JSON file backed configuration store.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn with_default_locator() -> Result<Self, ConfigError> {
        Ok(Self::new(ConfigLocator::new()?.config_file()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::CreateDir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<SessionConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(SessionConfig::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(SessionConfig::default());
        }
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError> {
        let payload = serde_json::to_string_pretty(config)?;
        Self::write_file(&self.path, &payload)
    }
}

/// Errors that can occur when reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine home directory for the snap configuration")]
    MissingHomeDir,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("could not parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn logged_in() -> SessionConfig {
        SessionConfig {
            access_token: "token".into(),
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            api_url: "https://dev.snapmaster.io".into(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn config_file_lives_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let locator = ConfigLocator::from_root_for_tests(temp_dir.path().to_path_buf());
        assert!(locator.config_file().ends_with("config.json"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp_dir.path().join("config.json"));
        let config = store.load().unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(!config.is_logged_in());
    }

    #[test]
    fn save_writes_legacy_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp_dir.path().join("nested").join("config.json"));
        store.save(&logged_in()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["AccessToken"], "token");
        assert_eq!(value["APIURL"], "https://dev.snapmaster.io");
        assert_eq!(value["RedirectURL"], DEFAULT_REDIRECT_URL);
        assert_eq!(store.load().unwrap(), logged_in());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_user_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp_dir.path().join("config.json"));
        store.save(&logged_in()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn lowercase_keys_and_missing_fields_are_accepted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"accesstoken":"abc","apiurl":"http://localhost:8080"}"#).unwrap();
        let config = FileConfigStore::new(path).load().unwrap();
        assert_eq!(config.access_token, "abc");
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn malformed_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let err = FileConfigStore::new(path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn clear_session_keeps_endpoints() {
        let mut config = logged_in();
        config.clear_session();
        assert!(!config.is_logged_in());
        assert!(config.name.is_empty());
        assert!(config.email.is_empty());
        assert_eq!(config.api_url, "https://dev.snapmaster.io");
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn env_overrides_skip_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("SNAP_APIURL", "http://localhost:3000"),
            ("SNAP_CLIENTID", "  "),
        ]
        .into_iter()
        .collect();
        let mut config = SessionConfig::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn environment_presets() {
        let mut config = SessionConfig::default();
        config.apply_environment(Environment::Dev);
        assert_eq!(config.auth_domain, "snapmaster-dev.auth0.com");
        config.apply_environment(Environment::Prod);
        assert_eq!(config.auth_domain, DEFAULT_AUTH_DOMAIN);
    }
}

//! Portal configuration.
//!
//! Configuration is TOML with serde defaults for every field, so an empty file
//! (or no file at all) yields a working local setup.
//!
//! # Examples
//!
//! ```toml
//! [api]
//! base_url = "https://billing.example.com"
//! timeout_secs = 30
//! cancel_style = "delete"
//!
//! [payment]
//! public_key = "ewr1-abc"
//!
//! [session]
//! path = "/var/lib/member-portal/session.json"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use url::Url;

use crate::error::{PortalError, Result};

/// Environment variable overriding [`ApiConfig::base_url`].
pub const ENV_API_URL: &str = "MEMBER_PORTAL_API_URL";
/// Environment variable overriding [`PaymentConfig::public_key`].
pub const ENV_PUBLIC_KEY: &str = "MEMBER_PORTAL_PUBLIC_KEY";
/// Environment variable overriding [`SessionConfig::path`].
pub const ENV_SESSION_PATH: &str = "MEMBER_PORTAL_SESSION_PATH";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalConfig {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Payment tokenization settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Session persistence settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl PortalConfig {
    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if the TOML is malformed or a
    /// value fails [`PortalConfig::validate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use member_portal::config::PortalConfig;
    ///
    /// let config = PortalConfig::from_toml("[api]\nbase_url = \"https://api.example.com\"")?;
    /// assert_eq!(config.api.base_url, "https://api.example.com");
    /// # Ok::<(), member_portal::PortalError>(())
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PortalError::ConfigError(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if the file exists but cannot be
    /// read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::debug!(path = %path.display(), "loaded portal configuration");
                Self::from_toml(&content)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            },
            Err(e) => Err(PortalError::ConfigError(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Applies overrides from `MEMBER_PORTAL_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if an overridden value is invalid.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, then re-validates.
    pub(crate) fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(key) = lookup(ENV_PUBLIC_KEY) {
            self.payment.public_key = key;
        }
        if let Some(path) = lookup(ENV_SESSION_PATH) {
            self.session.path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates all sections.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.payment.validate()
    }
}

/// How the backend expects a subscription cancellation.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelStyle {
    /// `PUT /subscriptions/:id/cancel`
    #[default]
    PutCancel,
    /// `DELETE /subscriptions/:id`
    Delete,
}

/// Backend API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL all API paths are appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Cancellation endpoint style.
    #[serde(default)]
    pub cancel_style: CancelStyle,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            cancel_style: CancelStyle::default(),
        }
    }
}

impl ApiConfig {
    /// Validates the base URL and timeouts.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `base_url` does not parse, is not `http`/`https`, or has no host
    /// - `timeout_secs` is outside 1-300
    /// - `connect_timeout_secs` is outside 1-60
    pub fn validate(&self) -> Result<()> {
        let url = self.parsed_base_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(PortalError::ConfigError(format!(
                "base_url must use http or https, got: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(PortalError::ConfigError(format!(
                "base_url has no host: {}",
                self.base_url
            )));
        }
        check_timeouts(self.timeout_secs, self.connect_timeout_secs)
    }

    /// Parses the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if the URL is malformed.
    pub fn parsed_base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|e| {
            PortalError::ConfigError(format!("invalid base_url '{}': {e}", self.base_url))
        })
    }

    /// Returns timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns connect timeout as Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Payment tokenization configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Publishable key identifying the merchant to the tokenization service.
    #[serde(default)]
    pub public_key: String,

    /// Tokenization endpoint.
    #[serde(default = "default_tokenize_url")]
    pub tokenize_url: String,

    /// Tokenization request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Tokenization connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            tokenize_url: default_tokenize_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PaymentConfig {
    /// Validates the tokenization endpoint and timeouts.
    ///
    /// The public key may be empty here; the widget refuses to tokenize
    /// without one.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ConfigError`] if `tokenize_url` is not HTTPS or
    /// a timeout is out of the ranges [`ApiConfig::validate`] accepts.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.tokenize_url).map_err(|e| {
            PortalError::ConfigError(format!("invalid tokenize_url '{}': {e}", self.tokenize_url))
        })?;
        if url.scheme() != "https" {
            return Err(PortalError::ConfigError(format!(
                "tokenize_url must use HTTPS, got: {}",
                url.scheme()
            )));
        }
        check_timeouts(self.timeout_secs, self.connect_timeout_secs)
    }

    /// Returns timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns connect timeout as Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn check_timeouts(timeout_secs: u64, connect_timeout_secs: u64) -> Result<()> {
    if timeout_secs == 0 || timeout_secs > 300 {
        return Err(PortalError::ConfigError("timeout_secs must be between 1 and 300".to_owned()));
    }
    if connect_timeout_secs == 0 || connect_timeout_secs > 60 {
        return Err(PortalError::ConfigError(
            "connect_timeout_secs must be between 1 and 60".to_owned(),
        ));
    }
    Ok(())
}

/// Session persistence configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Session file path. The front end picks a platform default when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_owned()
}

fn default_tokenize_url() -> String {
    "https://api.recurly.com/js/v1/token".to_owned()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = PortalConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.api.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.api.cancel_style, CancelStyle::PutCancel);
        assert!(config.payment.public_key.is_empty());
        assert!(config.session.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = PortalConfig::from_toml("").unwrap();
        assert_eq!(config.api.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            [api]
            base_url = "https://billing.example.com"
            timeout_secs = 45
            connect_timeout_secs = 5
            cancel_style = "delete"

            [payment]
            public_key = "ewr1-test"
            tokenize_url = "https://tokens.example.com/v1/token"
            timeout_secs = 20
            connect_timeout_secs = 3

            [session]
            path = "/tmp/session.json"
        "#;

        let config = PortalConfig::from_toml(toml).unwrap();
        assert_eq!(config.api.base_url, "https://billing.example.com");
        assert_eq!(config.api.timeout_secs, 45);
        assert_eq!(config.api.connect_timeout_secs, 5);
        assert_eq!(config.api.cancel_style, CancelStyle::Delete);
        assert_eq!(config.payment.public_key, "ewr1-test");
        assert_eq!(config.payment.timeout(), Duration::from_secs(20));
        assert_eq!(config.payment.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.session.path, Some(PathBuf::from("/tmp/session.json")));
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let err = PortalConfig::from_toml("[api]\nbase_url = \"ftp://example.com\"").unwrap_err();
        assert!(matches!(err, PortalError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_timeouts_out_of_range() {
        assert!(PortalConfig::from_toml("[api]\ntimeout_secs = 0").is_err());
        assert!(PortalConfig::from_toml("[api]\ntimeout_secs = 301").is_err());
        assert!(PortalConfig::from_toml("[api]\nconnect_timeout_secs = 61").is_err());
    }

    #[test]
    fn test_payment_timeouts_bounded() {
        let config = PortalConfig::default();
        assert_eq!(config.payment.timeout(), Duration::from_secs(30));
        assert_eq!(config.payment.connect_timeout(), Duration::from_secs(10));

        assert!(PortalConfig::from_toml("[payment]\ntimeout_secs = 0").is_err());
        assert!(PortalConfig::from_toml("[payment]\ntimeout_secs = 301").is_err());
        assert!(PortalConfig::from_toml("[payment]\nconnect_timeout_secs = 0").is_err());
        assert!(PortalConfig::from_toml("[payment]\nconnect_timeout_secs = 61").is_err());
    }

    #[test]
    fn test_rejects_plain_http_tokenizer() {
        let err =
            PortalConfig::from_toml("[payment]\ntokenize_url = \"http://tokens.example.com\"")
                .unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(PortalConfig::from_toml("[api").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "https://override.example.com"),
            (ENV_PUBLIC_KEY, "ewr1-env"),
            (ENV_SESSION_PATH, "/tmp/override.json"),
        ]);
        let config = PortalConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.api.base_url, "https://override.example.com");
        assert_eq!(config.payment.public_key, "ewr1-env");
        assert_eq!(config.session.path, Some(PathBuf::from("/tmp/override.json")));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = PortalConfig::default()
            .apply_overrides(|key| (key == ENV_API_URL).then(|| "not a url".to_owned()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortalConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nbase_url = \"https://api.example.com\"\n").unwrap();
        let config = PortalConfig::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://api.example.com");
    }
}

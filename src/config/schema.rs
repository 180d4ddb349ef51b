//! TOML configuration with environment overrides.
//!
//! Priority: environment variable > config file > built-in default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the artifact signing key.
pub const ENV_SIGNING_KEY: &str = "AUTHROTOR_SIGNING_KEY";

/// Shortest accepted signing key, in bytes.
const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Longest accepted TTL (ten years).
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide artifact signing key. Prefer `AUTHROTOR_SIGNING_KEY`.
    pub signing_key: Option<String>,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub notifier: NotifierConfig,
    pub rotation: RotationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Take the caller address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            trust_forwarded_headers: false,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// "sqlite" or "memory".
    pub kind: String,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = directories::ProjectDirs::from("", "", "authrotor")
            .map(|dirs| dirs.data_local_dir().join("users.db"))
            .unwrap_or_else(|| PathBuf::from("users.db"));
        Self {
            kind: "sqlite".into(),
            path,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// "log" or "smtp".
    pub kind: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub sender_email: Option<String>,
    pub sender_password: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: "log".into(),
            smtp_host: None,
            smtp_port: 587,
            sender_email: None,
            sender_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    /// PBKDF2 rounds for new refresh digests.
    pub digest_rounds: u32,
    /// Deadline for each store / notifier call.
    pub call_timeout_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 30 * 24 * 3600,
            digest_rounds: crate::auth::digest::DEFAULT_DIGEST_ROUNDS,
            call_timeout_secs: 3,
        }
    }
}

impl Config {
    /// Default config file location (`<config_dir>/authrotor/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "authrotor")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (must exist) or the default location (optional),
    /// then apply environment overrides. Callers that serve traffic must
    /// also call [`Config::validate`]; provisioning commands need no key.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::from_file(&default)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `AUTHROTOR_*` overrides. `lookup` abstracts the environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = get(ENV_SIGNING_KEY) {
            self.signing_key = Some(key);
        }
        if let Some(host) = get("AUTHROTOR_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("AUTHROTOR_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid AUTHROTOR_PORT value '{port}'"),
            }
        }
        if let Some(path) = get("AUTHROTOR_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(host) = get("AUTHROTOR_SMTP_HOST") {
            self.notifier.smtp_host = Some(host);
            self.notifier.kind = "smtp".into();
        }
        if let Some(port) = get("AUTHROTOR_SMTP_PORT") {
            match port.parse() {
                Ok(port) => self.notifier.smtp_port = port,
                Err(_) => tracing::warn!("Ignoring invalid AUTHROTOR_SMTP_PORT value '{port}'"),
            }
        }
        if let Some(sender) = get("AUTHROTOR_SENDER_EMAIL") {
            self.notifier.sender_email = Some(sender);
        }
        if let Some(password) = get("AUTHROTOR_SENDER_PASSWORD") {
            self.notifier.sender_password = Some(password);
        }
    }

    /// The configured signing key as bytes.
    pub fn signing_key_bytes(&self) -> Result<Vec<u8>> {
        let key = self
            .signing_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("No signing key configured. Set {ENV_SIGNING_KEY} or signing_key")
            })?;
        Ok(key.as_bytes().to_vec())
    }

    pub fn validate(&self) -> Result<()> {
        let key = self.signing_key_bytes()?;
        if key.len() < MIN_SIGNING_KEY_BYTES {
            bail!("signing_key must be at least {MIN_SIGNING_KEY_BYTES} bytes");
        }

        let rotation = &self.rotation;
        if rotation.access_ttl_secs == 0 || rotation.refresh_ttl_secs == 0 {
            bail!("rotation TTLs must be greater than zero");
        }
        if rotation.refresh_ttl_secs > MAX_TTL_SECS {
            bail!(
                "rotation.refresh_ttl_secs ({}) exceeds the maximum of {MAX_TTL_SECS}",
                rotation.refresh_ttl_secs
            );
        }
        if rotation.access_ttl_secs >= rotation.refresh_ttl_secs {
            bail!(
                "rotation.access_ttl_secs ({}) must be shorter than rotation.refresh_ttl_secs ({})",
                rotation.access_ttl_secs,
                rotation.refresh_ttl_secs
            );
        }
        if rotation.digest_rounds == 0 {
            bail!("rotation.digest_rounds must be greater than zero");
        }
        if rotation.call_timeout_secs == 0 {
            bail!("rotation.call_timeout_secs must be greater than zero");
        }
        if self.gateway.request_timeout_secs == 0 {
            bail!("gateway.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

//! Startup configuration and credential resolution
//!
//! The backend credential is the only required value. Everything else is a
//! deployment knob with a default.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the one secret the service needs
pub const CREDENTIAL_NAME: &str = "GEMINI_API_KEY";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_SECRETS_PATH: &str = "secrets.toml";
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("malformed credential: {0} must be a non-empty token without whitespace")]
    MalformedCredential(&'static str),
    #[error("cannot read secrets file {path}: {reason}")]
    SecretsFile { path: PathBuf, reason: String },
    #[error("cannot load persona from {path}: {reason}")]
    PersonaFile { path: PathBuf, reason: String },
    #[error("invalid value for {key}: {value}")]
    InvalidSetting { key: &'static str, value: String },
    #[error("cannot prepare backend client: {0}")]
    BackendClient(String),
}

// ============================================================================
// Secret stores
// ============================================================================

/// Read-only lookup of named secrets
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

impl SecretStore for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Secrets from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Secrets from a flat TOML file (`KEY = "value"` per line)
#[derive(Debug, Default, Clone)]
pub struct TomlSecretStore {
    values: HashMap<String, String>,
}

impl TomlSecretStore {
    /// Load a secrets file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No secrets file, skipping");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigurationError::SecretsFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        Self::parse(&raw).map_err(|reason| ConfigurationError::SecretsFile {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse secrets from TOML text. Only top-level string values are kept.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let table: toml::Table = raw.parse().map_err(|e: toml::de::Error| e.to_string())?;
        let values = table
            .into_iter()
            .filter_map(|(key, value)| match value {
                toml::Value::String(s) => Some((key, s)),
                _ => None,
            })
            .collect();
        Ok(Self { values })
    }
}

impl SecretStore for TomlSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Environment first, then the secrets file
pub struct LayeredSecretStore {
    layers: Vec<Box<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new(layers: Vec<Box<dyn SecretStore>>) -> Self {
        Self { layers }
    }
}

impl SecretStore for LayeredSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Backend API key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Resolve the backend credential. Absence or a malformed value is fatal.
pub fn resolve_credential(store: &dyn SecretStore) -> Result<Credential, ConfigurationError> {
    let raw = store
        .get(CREDENTIAL_NAME)
        .ok_or(ConfigurationError::MissingCredential(CREDENTIAL_NAME))?;

    let value = raw.trim();
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigurationError::MalformedCredential(CREDENTIAL_NAME));
    }

    Ok(Credential(value.to_string()))
}

// ============================================================================
// Application settings
// ============================================================================

/// Which backend shape a deployment talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// Mode A: a session handle holds the context, only new text is sent
    Session,
    /// Mode B: the full transcript is replayed on every call
    #[default]
    Stateless,
}

impl BackendMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session" | "a" => Some(Self::Session),
            "stateless" | "b" => Some(Self::Stateless),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Stateless => "stateless",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub model_id: String,
    pub backend_mode: BackendMode,
    pub streaming: bool,
    pub session_ttl: Duration,
    pub llm_timeout: Duration,
    pub persona_path: Option<PathBuf>,
    pub secrets_path: PathBuf,
    /// Override for the Gemini API root (tests, proxies)
    pub base_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            model_id: DEFAULT_MODEL.to_string(),
            backend_mode: BackendMode::default(),
            streaming: true,
            session_ttl: DEFAULT_SESSION_TTL,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
            persona_path: None,
            secrets_path: PathBuf::from(DEFAULT_SECRETS_PATH),
            base_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(port) = lookup("ADVOCATE_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| invalid("ADVOCATE_PORT", &port))?;
        }
        if let Some(model) = lookup("ADVOCATE_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model_id = model.trim().to_string();
        }
        if let Some(mode) = lookup("ADVOCATE_BACKEND_MODE") {
            config.backend_mode =
                BackendMode::parse(&mode).ok_or_else(|| invalid("ADVOCATE_BACKEND_MODE", &mode))?;
        }
        if let Some(streaming) = lookup("ADVOCATE_STREAMING") {
            config.streaming =
                parse_bool(&streaming).ok_or_else(|| invalid("ADVOCATE_STREAMING", &streaming))?;
        }
        if let Some(ttl) = lookup("ADVOCATE_SESSION_TTL_SECS") {
            config.session_ttl = parse_secs(&ttl).ok_or_else(|| invalid("ADVOCATE_SESSION_TTL_SECS", &ttl))?;
        }
        if let Some(timeout) = lookup("ADVOCATE_LLM_TIMEOUT_SECS") {
            config.llm_timeout =
                parse_secs(&timeout).ok_or_else(|| invalid("ADVOCATE_LLM_TIMEOUT_SECS", &timeout))?;
        }
        config.persona_path = lookup("ADVOCATE_PERSONA_PATH").map(PathBuf::from);
        if let Some(path) = lookup("ADVOCATE_SECRETS_PATH") {
            config.secrets_path = PathBuf::from(path);
        }
        config.base_url = lookup("GEMINI_BASE_URL");

        Ok(config)
    }

    /// The secret store a deployment resolves its credential from
    pub fn secret_store(&self) -> Result<LayeredSecretStore, ConfigurationError> {
        self.layered_store(Box::new(EnvSecretStore))
    }

    /// `primary` first, then the secrets file. The file is only read when
    /// `primary` lacks the credential.
    fn layered_store(
        &self,
        primary: Box<dyn SecretStore>,
    ) -> Result<LayeredSecretStore, ConfigurationError> {
        if primary.get(CREDENTIAL_NAME).is_some() {
            return Ok(LayeredSecretStore::new(vec![primary]));
        }
        let file = TomlSecretStore::load(&self.secrets_path)?;
        Ok(LayeredSecretStore::new(vec![primary, Box::new(file)]))
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key,
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogLevel;
use crate::paths;

pub const DEFAULT_ENGINE: &str = "gpt-3.5-turbo";
/// Engine the backend serves to accounts without a paid plan.
pub const FREE_ENGINE: &str = "text-davinci-002-render-sha";
pub const DEFAULT_BASE_URL: &str = "https://bypass.churchless.tech/api/";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEMPERATURE: f64 = 0.9;
pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_INIT_MESSAGE: &str =
    "You are chatGPT, trained on a very huge dataset of conversations. Act conversationally";

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no credentials provided, please set an API key, email and password, or access token")]
    MissingCredentials,

    #[error("email and password must be set together")]
    IncompleteLogin,

    #[error("client is not started, call start() first")]
    NotStarted,

    #[error("invalid proxy url '{0}'")]
    InvalidProxy(String),
}

/// The credential a session authenticates with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Login { email: String, password: String },
    BearerToken(String),
    /// No credential configured; the session runs on the token found in its
    /// token cache and stops working when that entry expires.
    Cached,
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ApiKey(_) => "api key",
            Credential::Login { .. } => "email and password",
            Credential::BearerToken(_) => "access token",
            Credential::Cached => "cached access token",
        }
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}***")
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(key) => f.debug_tuple("ApiKey").field(&mask(key)).finish(),
            Credential::Login { email, .. } => f
                .debug_struct("Login")
                .field("email", email)
                .field("password", &"***")
                .finish(),
            Credential::BearerToken(token) => {
                f.debug_tuple("BearerToken").field(&mask(token)).finish()
            }
            Credential::Cached => f.write_str("Cached"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub engine: Option<String>,
    pub init_message: Option<String>,
    /// Backend base URL used in access-token mode; `conversation` is appended to it.
    pub base_url: Option<String>,
    /// Chat completion API base used in API-key mode.
    pub api_base: Option<String>,
    pub temperature: Option<f64>,
    pub log_level: LogLevel,
    pub is_paid: bool,
    pub disable_cache: bool,
    pub proxy: Option<String>,
    pub cache_path: Option<PathBuf>,
    pub session_name: Option<String>,
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl ClientConfig {
    /// Load from `~/.gptchat/config.json`, then `./config.toml`, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::from_files(&paths::config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// The first readable file wins; unreadable or unparsable files are skipped.
    pub fn from_files(json_path: &Path, toml_path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(json_path) {
            match serde_json::from_str::<ClientConfig>(&content) {
                Ok(config) => return config,
                Err(err) => log::warn!("Failed to parse {}: {}", json_path.display(), err),
            }
        }

        if let Ok(content) = std::fs::read_to_string(toml_path) {
            match toml::from_str::<ClientConfig>(&content) {
                Ok(config) => return config,
                Err(err) => log::warn!("Failed to parse {}: {}", toml_path.display(), err),
            }
        }

        Self::default()
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(email) = lookup("OPENAI_EMAIL") {
            self.email = Some(email);
        }
        if let Some(password) = lookup("OPENAI_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(token) = lookup("OPENAI_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(engine) = lookup("GPT_ENGINE") {
            self.engine = Some(engine);
        }
        if let Some(base_url) = lookup("GPT_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(api_base) = lookup("GPT_API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(proxy) = lookup("HTTPS_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(disable) = lookup("GPT_DISABLE_CACHE") {
            self.disable_cache = parse_bool_env(&disable);
        }
        if let Some(level) = lookup("GPT_LOG_LEVEL").as_deref().and_then(LogLevel::parse) {
            self.log_level = level;
        }
    }

    /// Pick the authoritative credential: api key, then email/password, then access token.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let email = non_empty(&self.email);
        let password = non_empty(&self.password);
        if email.is_some() != password.is_some() {
            return Err(ConfigError::IncompleteLogin);
        }

        if let Some(key) = non_empty(&self.api_key) {
            return Ok(Credential::ApiKey(key.to_string()));
        }
        if let (Some(email), Some(password)) = (email, password) {
            return Ok(Credential::Login {
                email: email.to_string(),
                password: password.to_string(),
            });
        }
        if let Some(token) = non_empty(&self.access_token) {
            return Ok(Credential::BearerToken(token.to_string()));
        }
        Err(ConfigError::MissingCredentials)
    }

    pub fn engine(&self) -> &str {
        non_empty(&self.engine).unwrap_or(DEFAULT_ENGINE)
    }

    pub fn init_message(&self) -> &str {
        self.init_message
            .as_deref()
            .filter(|message| !message.is_empty())
            .unwrap_or(DEFAULT_INIT_MESSAGE)
    }

    pub fn base_url(&self) -> String {
        let base = non_empty(&self.base_url).unwrap_or(DEFAULT_BASE_URL);
        if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        }
    }

    pub fn api_base(&self) -> &str {
        non_empty(&self.api_base)
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    pub fn temperature(&self) -> f64 {
        match self.temperature {
            Some(value) if value != 0.0 => value,
            _ => DEFAULT_TEMPERATURE,
        }
    }

    pub fn session_name(&self) -> &str {
        non_empty(&self.session_name).unwrap_or(DEFAULT_SESSION)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(paths::token_cache_path)
    }

    pub fn proxy(&self) -> Option<&str> {
        non_empty(&self.proxy)
    }
}

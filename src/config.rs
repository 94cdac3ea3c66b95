//! Configuration loading and validation.
//!
//! Sources, highest precedence first:
//! - process environment (after loading `.env`, if present)
//! - `telehook.toml` (or the file passed with `--config`)
//! - built-in defaults
//!
//! The result is an immutable [`Config`] built once at startup. Any problem
//! is a [`ConfigError`] and is fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::relay::dispatcher::DispatcherSettings;
use crate::relay::whitelist::{Whitelist, WhitelistParseError};
use crate::webhook::retry::RetryPolicy;

/// Environment variable holding the webhook URL.
pub const WEBHOOK_URL_VAR: &str = "N8N_WEBHOOK_URL";

/// Environment variable holding the comma-separated chat whitelist.
pub const WHITELIST_VAR: &str = "TELEGRAM_WHITELIST_CHATS";

/// Default environment variable holding the Telegram bot token.
pub const DEFAULT_BOT_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "telehook.toml";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal configuration problems detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// No webhook URL in the environment or the config file.
    #[error("missing webhook URL: set N8N_WEBHOOK_URL or [webhook].url")]
    MissingWebhookUrl,

    /// The webhook URL is not an absolute http(s) URL.
    #[error("invalid webhook URL {url:?}: {reason}")]
    InvalidWebhookUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The whitelist contains a non-integer entry.
    #[error(
        "invalid whitelist format: {0}; expected comma-separated chat ids \
         (e.g. '-1001234567890,123456789')"
    )]
    InvalidWhitelist(#[from] WhitelistParseError),

    /// A numeric setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted setting name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A command needs the Telegram bot token but none is set.
    #[error("missing Telegram bot token: set {var}")]
    MissingBotToken {
        /// Environment variable that was checked.
        var: String,
    },
}

// ---------------------------------------------------------------------------
// File schema
// ---------------------------------------------------------------------------

/// Contents of the TOML config file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// Delivery endpoint settings.
    #[serde(default)]
    pub webhook: WebhookSection,

    /// Retry policy settings.
    #[serde(default)]
    pub retry: RetrySection,

    /// Dispatcher concurrency and shutdown settings.
    #[serde(default)]
    pub dispatcher: DispatcherSection,

    /// Telegram source settings.
    #[serde(default)]
    pub telegram: TelegramSection,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[webhook]` section.
#[derive(Debug, Deserialize)]
pub struct WebhookSection {
    /// Endpoint URL; overridden by `N8N_WEBHOOK_URL`.
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Deserialize)]
pub struct RetrySection {
    /// Total attempts per record, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// `[dispatcher]` section.
#[derive(Debug, Deserialize)]
pub struct DispatcherSection {
    /// Maximum concurrent deliveries.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Capacity of the channel between the event source and the dispatcher.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds allowed for in-flight deliveries at shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// `[telegram]` section.
#[derive(Debug, Deserialize)]
pub struct TelegramSection {
    /// Environment variable name holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Whitelisted chat ids; overridden by `TELEGRAM_WHITELIST_CHATS`.
    #[serde(default)]
    pub whitelist: Vec<i64>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            whitelist: Vec::new(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Default, Deserialize)]
pub struct LoggingSection {
    /// Directory for rotated JSON logs; console only when unset.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

// Default value functions for serde

fn default_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    64
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_bot_token_env() -> String {
    DEFAULT_BOT_TOKEN_VAR.to_owned()
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Validated runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// Delivery endpoint.
    pub webhook_url: Url,
    /// Chats eligible for forwarding; empty allows all.
    pub whitelist: Whitelist,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Dispatcher concurrency and shutdown settings.
    pub dispatcher: DispatcherSettings,
    /// Capacity of the source → dispatcher channel.
    pub queue_capacity: usize,
    /// Environment variable the bot token was read from.
    pub bot_token_env: String,
    /// Directory for rotated JSON logs.
    pub logs_dir: Option<PathBuf>,
    bot_token: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("webhook_url", &self.webhook_url.as_str())
            .field("whitelist", &self.whitelist)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("dispatcher", &self.dispatcher)
            .field("queue_capacity", &self.queue_capacity)
            .field("bot_token_env", &self.bot_token_env)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("logs_dir", &self.logs_dir)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment and a config file.
    ///
    /// With `path = None`, `telehook.toml` in the working directory is used
    /// if it exists. An explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable or invalid, or when
    /// the merged settings fail validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = read_file_config(path)?;
        Self::from_sources(file, &process_env())
    }

    /// Merge a parsed config file with environment values and validate.
    ///
    /// Blank environment values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required value is missing or a value is
    /// malformed or out of range.
    pub fn from_sources(
        file: FileConfig,
        env: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| {
            env.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let raw_url = lookup(WEBHOOK_URL_VAR)
            .or(file.webhook.url)
            .ok_or(ConfigError::MissingWebhookUrl)?;
        let webhook_url = parse_webhook_url(&raw_url)?;

        let whitelist = match lookup(WHITELIST_VAR) {
            Some(raw) => Whitelist::parse(&raw)?,
            None => Whitelist::new(file.telegram.whitelist),
        };

        require_positive("webhook.timeout_secs", file.webhook.timeout_secs)?;
        require_positive(
            "webhook.connect_timeout_secs",
            file.webhook.connect_timeout_secs,
        )?;
        require_positive("retry.max_attempts", u64::from(file.retry.max_attempts))?;
        require_positive(
            "dispatcher.max_concurrency",
            u64::try_from(file.dispatcher.max_concurrency).unwrap_or(u64::MAX),
        )?;
        require_positive(
            "dispatcher.queue_capacity",
            u64::try_from(file.dispatcher.queue_capacity).unwrap_or(u64::MAX),
        )?;
        if file.retry.max_delay_ms < file.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_delay_ms",
                reason: format!(
                    "must be at least retry.base_delay_ms ({})",
                    file.retry.base_delay_ms
                ),
            });
        }

        let bot_token = lookup(&file.telegram.bot_token_env);

        Ok(Self {
            webhook_url,
            whitelist,
            request_timeout: Duration::from_secs(file.webhook.timeout_secs),
            connect_timeout: Duration::from_secs(file.webhook.connect_timeout_secs),
            retry: RetryPolicy {
                max_attempts: file.retry.max_attempts,
                base_delay: Duration::from_millis(file.retry.base_delay_ms),
                max_delay: Duration::from_millis(file.retry.max_delay_ms),
            },
            dispatcher: DispatcherSettings {
                max_concurrency: file.dispatcher.max_concurrency,
                shutdown_grace: Duration::from_secs(file.dispatcher.shutdown_grace_secs),
            },
            queue_capacity: file.dispatcher.queue_capacity,
            bot_token_env: file.telegram.bot_token_env,
            logs_dir: file.logging.logs_dir,
            bot_token,
        })
    }

    /// Log the startup banner: endpoint, whitelist, and delivery tuning.
    ///
    /// An empty whitelist forwards every chat and is reported as a warning.
    pub fn log_startup(&self) {
        info!(endpoint = %self.webhook_url, "webhook endpoint configured");

        if self.whitelist.is_empty() {
            warn!(
                "no whitelist configured - ALL messages will be forwarded! \
                 Consider setting {WHITELIST_VAR} for security"
            );
        } else {
            info!(
                chats = self.whitelist.len(),
                ids = %self.whitelist,
                "monitoring whitelisted chats"
            );
        }

        info!(
            timeout_secs = self.request_timeout.as_secs(),
            max_attempts = self.retry.max_attempts,
            max_concurrency = self.dispatcher.max_concurrency,
            queue_capacity = self.queue_capacity,
            "delivery settings"
        );
    }

    /// The Telegram bot token, if one was configured.
    pub fn bot_token(&self) -> Option<&str> {
        self.bot_token.as_deref()
    }

    /// The Telegram bot token, or an error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBotToken`] when no token is configured.
    pub fn require_bot_token(&self) -> Result<&str, ConfigError> {
        self.bot_token()
            .ok_or_else(|| ConfigError::MissingBotToken {
                var: self.bot_token_env.clone(),
            })
    }
}

/// Resolve only the Telegram bot token, for commands that never deliver.
///
/// # Errors
///
/// Returns [`ConfigError`] when the config file is invalid or the token
/// variable is unset.
pub fn load_bot_token(path: Option<&Path>) -> Result<String, ConfigError> {
    let file = read_file_config(path)?;
    let var = file.telegram.bot_token_env;
    process_env()
        .get(&var)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingBotToken { var })
}

/// Parse the TOML config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `.env` from the working directory (or a parent) into the process
/// environment. Returns the file used, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Read `path`, or the default file if present, or fall back to defaults.
fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    match path {
        Some(path) => load_file_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_file_config(default_path)
            } else {
                Ok(FileConfig::default())
            }
        }
    }
}

/// Process environment, skipping entries that are not valid UTF-8.
fn process_env() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn parse_webhook_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidWebhookUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidWebhookUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_owned(),
        });
    }
    Ok(())
}

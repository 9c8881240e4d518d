//! Configuration loading and validation.
//!
//! Loads `wagate.toml` from `$WAGATE_CONFIG_PATH` or `~/.wagate/wagate.toml`.
//! Every section uses `#[serde(default)]`, so a missing or empty file is valid.
//!
//! Precedence: env vars > config file > defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::dispatcher::DialingPlan;
use crate::ledger::ReceiptPolicy;

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "WAGATE_CONFIG_PATH";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener and authentication.
    pub server: ServerConfig,
    /// Transport bridge sidecar.
    pub bridge: BridgeConfig,
    /// Filesystem locations for persistent state.
    pub paths: PathsConfig,
    /// Device pairing timeouts.
    pub pairing: PairingConfig,
    /// Phone number normalization.
    pub dialing: DialingConfig,
    /// Message status ledger behavior.
    pub ledger: LedgerConfig,
    /// Inbound message acknowledgment worker.
    pub ack: AckConfig,
    /// Transport event channel.
    pub events: EventsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind (e.g. "0.0.0.0:3000").
    pub bind: String,
    /// Environment variable name holding the shared bearer secret.
    pub auth_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_owned(),
            auth_token_env: "WAGATE_AUTH_TOKEN".to_owned(),
        }
    }
}

/// Connection settings for the HTTP transport bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the bridge sidecar.
    pub base_url: String,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_owned(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Filesystem paths. Unset values resolve under `~/.wagate/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory for gateway state.
    pub data_dir: Option<PathBuf>,
}

/// Pairing timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Seconds `login` waits for the first pairing code.
    pub timeout_secs: u64,
    /// Seconds a pairing attempt may stay in `AwaitingPairing` overall.
    pub window_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            window_secs: 180,
        }
    }
}

/// Dialing plan used to canonicalize recipient phone numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialingConfig {
    /// Country calling code without `+` (e.g. "62").
    pub country_code: String,
    /// Leading digit of mobile subscriber numbers (e.g. "8").
    pub mobile_prefix: String,
}

impl Default for DialingConfig {
    fn default() -> Self {
        Self {
            country_code: "62".to_owned(),
            mobile_prefix: "8".to_owned(),
        }
    }
}

impl DialingConfig {
    /// Build the dialing plan for the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the country code or mobile prefix is malformed.
    pub fn plan(&self) -> anyhow::Result<DialingPlan> {
        let mut prefix = self.mobile_prefix.chars();
        let digit = match (prefix.next(), prefix.next()) {
            (Some(c), None) => c,
            _ => anyhow::bail!("dialing.mobile_prefix must be a single digit"),
        };
        DialingPlan::new(&self.country_code, digit)
            .map_err(|e| anyhow::anyhow!("invalid dialing plan: {e}"))
    }
}

/// Ledger behavior toggles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How receipts that arrive out of order are applied.
    pub receipt_policy: ReceiptPolicy,
    /// Reject `record_sent` for an id that already exists.
    pub strict_ids: bool,
}

/// Bounds for the read-acknowledgment worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    /// Pending acknowledgments buffered before new ones are dropped.
    pub queue_capacity: usize,
    /// Maximum acknowledgments in flight at once.
    pub max_in_flight: usize,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_in_flight: 8,
        }
    }
}

/// Transport event channel sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffer size of the transport -> correlator channel.
    pub channel_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 256,
        }
    }
}

/// Resolved filesystem paths for gateway state.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory (`~/.wagate/` unless overridden).
    pub root: PathBuf,
    /// SQLite file backing the message status ledger.
    pub ledger_db: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

impl Config {
    /// Load configuration with precedence env vars > TOML file > defaults.
    ///
    /// A missing config file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// the merged configuration fails validation.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path_with(|key| std::env::var(key).ok())?;
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string into config without env overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides using the given resolver.
    ///
    /// Takes a resolver so tests can supply values without touching the
    /// process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("WAGATE_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("WAGATE_BRIDGE_URL") {
            self.bridge.base_url = v;
        }
        if let Some(v) = env("WAGATE_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("WAGATE_PAIRING_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.pairing.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "WAGATE_PAIRING_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("WAGATE_COUNTRY_CODE") {
            self.dialing.country_code = v;
        }
    }

    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;
        anyhow::ensure!(
            !self.server.auth_token_env.trim().is_empty(),
            "server.auth_token_env must not be empty"
        );

        let url = url::Url::parse(&self.bridge.base_url)
            .with_context(|| format!("bridge.base_url is not a URL: {}", self.bridge.base_url))?;
        anyhow::ensure!(
            url.scheme() == "http" || url.scheme() == "https",
            "bridge.base_url must use http or https"
        );
        anyhow::ensure!(
            self.bridge.connect_timeout_secs >= 1 && self.bridge.request_timeout_secs >= 1,
            "bridge timeouts must be >= 1 second"
        );

        anyhow::ensure!(
            (1..=600).contains(&self.pairing.timeout_secs),
            "pairing.timeout_secs must be in [1, 600]"
        );
        anyhow::ensure!(
            self.pairing.window_secs >= self.pairing.timeout_secs,
            "pairing.window_secs must be >= pairing.timeout_secs"
        );

        self.dialing.plan()?;

        anyhow::ensure!(
            (1..=256).contains(&self.ack.max_in_flight),
            "ack.max_in_flight must be in [1, 256]"
        );
        anyhow::ensure!(
            self.ack.queue_capacity >= 1,
            "ack.queue_capacity must be >= 1"
        );
        anyhow::ensure!(
            self.events.channel_buffer >= 1,
            "events.channel_buffer must be >= 1"
        );
        Ok(())
    }

    /// Read the bearer secret from the configured environment variable.
    pub fn auth_token(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        env(&self.server.auth_token_env).filter(|t| !t.trim().is_empty())
    }
}

/// Resolve the default config directory (`~/.wagate/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".wagate"))
}

/// Resolve the config file path using a custom env resolver.
///
/// # Errors
///
/// Returns an error if no override is set and the home directory is unknown.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("wagate.toml"))
}

/// Resolve runtime paths, honoring `paths.data_dir`.
///
/// # Errors
///
/// Returns an error if no data dir is configured and the home directory is unknown.
pub fn runtime_paths(config: &Config) -> anyhow::Result<RuntimePaths> {
    let root = match &config.paths.data_dir {
        Some(dir) => dir.clone(),
        None => config_dir()?,
    };
    Ok(paths_under(&root))
}

fn paths_under(root: &Path) -> RuntimePaths {
    RuntimePaths {
        root: root.to_path_buf(),
        ledger_db: root.join("data").join("messages.db"),
        logs_dir: root.join("logs"),
    }
}

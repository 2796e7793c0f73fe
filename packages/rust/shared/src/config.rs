//! Application configuration for Wayback.
//!
//! User config lives at `~/.wayback/wayback.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file: it names the environment variable that
//! holds them.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaybackError};
use crate::types::{Slot, SlotInfo, SlotRegistry};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "wayback.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".wayback";

// ---------------------------------------------------------------------------
// Config structs (matching wayback.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Per-slot enablement and display metadata.
    #[serde(default)]
    pub slots: SlotsConfig,

    /// Backend endpoints.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Anonymized web front-end.
    #[serde(default)]
    pub web: WebConfig,

    /// Matrix bot.
    #[serde(default)]
    pub matrix: MatrixConfig,

    /// Outbound publishing.
    #[serde(default)]
    pub publish: PublishConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Overall deadline for one dispatch, in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    300
}

/// `[slots]` section, one table per slot.
///
/// A table that leaves `enabled` out keeps the slot's default: `ia`, `is`
/// and `ip` on, `ph` off until a Telegraph token is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotsConfig {
    #[serde(default)]
    pub ia: SlotConfig,
    #[serde(default)]
    pub is: SlotConfig,
    #[serde(default)]
    pub ip: SlotConfig,
    #[serde(default)]
    pub ph: SlotConfig,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        let explicit = |slot: Slot| SlotConfig {
            enabled: Some(enabled_by_default(slot)),
            ..SlotConfig::default()
        };
        Self {
            ia: explicit(Slot::Ia),
            is: explicit(Slot::Is),
            ip: explicit(Slot::Ip),
            ph: explicit(Slot::Ph),
        }
    }
}

impl SlotsConfig {
    fn get(&self, slot: Slot) -> &SlotConfig {
        match slot {
            Slot::Ia => &self.ia,
            Slot::Is => &self.is,
            Slot::Ip => &self.ip,
            Slot::Ph => &self.ph,
        }
    }

    /// Whether `slot` is enabled, falling back to its default.
    pub fn is_enabled(&self, slot: Slot) -> bool {
        self.get(slot)
            .enabled
            .unwrap_or_else(|| enabled_by_default(slot))
    }
}

fn enabled_by_default(slot: Slot) -> bool {
    slot != Slot::Ph
}

/// `[slots.<id>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Home link override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

/// `[backends]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Wayback Machine base URL.
    #[serde(default = "default_ia_endpoint")]
    pub ia_endpoint: String,
    /// archive.today mirror base URL.
    #[serde(default = "default_is_endpoint")]
    pub is_endpoint: String,
    /// IPFS node HTTP API base URL.
    #[serde(default = "default_ipfs_api")]
    pub ipfs_api: String,
    /// Public gateway used to build archived IPFS links.
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,
    /// Telegraph API base URL.
    #[serde(default = "default_telegraph_endpoint")]
    pub telegraph_endpoint: String,
    /// Name of the env var holding the Telegraph access token.
    #[serde(default = "default_telegraph_token_env")]
    pub telegraph_token_env: String,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent sent to backends.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            ia_endpoint: default_ia_endpoint(),
            is_endpoint: default_is_endpoint(),
            ipfs_api: default_ipfs_api(),
            ipfs_gateway: default_ipfs_gateway(),
            telegraph_endpoint: default_telegraph_endpoint(),
            telegraph_token_env: default_telegraph_token_env(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_ia_endpoint() -> String {
    "https://web.archive.org".into()
}
fn default_is_endpoint() -> String {
    "https://archive.ph".into()
}
fn default_ipfs_api() -> String {
    "http://127.0.0.1:5001".into()
}
fn default_ipfs_gateway() -> String {
    "https://ipfs.io".into()
}
fn default_telegraph_endpoint() -> String {
    "https://api.telegra.ph".into()
}
fn default_telegraph_token_env() -> String {
    "WAYBACK_TELEGRAPH_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; WaybackArchiver/0.1; +https://github.com/wabarc/wayback)".into()
}

/// `[web]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Local address the HTTP listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Onion service registration.
    #[serde(default)]
    pub onion: OnionConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            onion: OnionConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8964".into()
}

/// `[web.onion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Tor control port address.
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    /// Name of the env var holding the control port password.
    #[serde(default = "default_control_password_env")]
    pub control_password_env: String,
    /// Name of the env var holding the onion private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// File the private key is read from and persisted to. Defaults to
    /// `onion.key` in the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Virtual port advertised on the onion address.
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
}

impl Default for OnionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            control_addr: default_control_addr(),
            control_password_env: default_control_password_env(),
            private_key_env: default_private_key_env(),
            key_file: None,
            remote_port: default_remote_port(),
        }
    }
}

fn default_control_addr() -> String {
    "127.0.0.1:9051".into()
}
fn default_control_password_env() -> String {
    "WAYBACK_TOR_CONTROL_PASSWORD".into()
}
fn default_private_key_env() -> String {
    "WAYBACK_TOR_PRIVKEY".into()
}
fn default_remote_port() -> u16 {
    80
}

/// `[matrix]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Homeserver base URL, e.g. `https://matrix.org`.
    #[serde(default)]
    pub homeserver: String,
    /// Bot user id, e.g. `@wayback:matrix.org`.
    #[serde(default)]
    pub user_id: String,
    /// Name of the env var holding the bot password.
    #[serde(default = "default_matrix_password_env")]
    pub password_env: String,
}

fn default_matrix_password_env() -> String {
    "WAYBACK_MATRIX_PASSWORD".into()
}

/// `[publish]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// URLs that receive every result set as a JSON POST.
    #[serde(default)]
    pub webhooks: Vec<String>,
}

impl From<&AppConfig> for SlotRegistry {
    fn from(config: &AppConfig) -> Self {
        SlotRegistry::new(Slot::ALL.iter().map(|&slot| {
            let slot_config = config.slots.get(slot);
            let mut info = SlotInfo::with_defaults(slot, config.slots.is_enabled(slot));
            if let Some(name) = &slot_config.name {
                info.name = name.clone();
            }
            if let Some(extra) = &slot_config.extra {
                info.extra = extra.clone();
            }
            info
        }))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.wayback/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| WaybackError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.wayback/wayback.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WaybackError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| WaybackError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| WaybackError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| WaybackError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| WaybackError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Read a secret from the named env var. Unset and empty are both `None`.
pub fn read_secret(var_name: &str) -> Option<SecretString> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Some(SecretString::new(val)),
        _ => None,
    }
}

/// Like [`read_secret`], but a missing value is a startup error.
pub fn require_secret(var_name: &str, what: &str) -> Result<SecretString> {
    read_secret(var_name).ok_or_else(|| {
        WaybackError::startup(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))
    })
}

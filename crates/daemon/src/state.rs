use std::time::Duration;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use common::crypto::{KeyError, KeyPair, SecretStore};
use common::signaling::SignalingConfig;

pub const APP_NAME: &str = "webrtc-live";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "enc_key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// The ledger account our calls are made as
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Where the signaling ledger is reached
    #[serde(default = "default_ledger_url")]
    pub ledger_url: Url,
    /// Listen port for a locally hosted ledger service
    #[serde(default = "default_ledger_port")]
    pub ledger_port: u16,
    /// Page that share URLs point at
    #[serde(default = "default_share_base_url")]
    pub share_base_url: Url,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_account_id() -> String {
    "anonymous".to_string()
}

fn default_ledger_port() -> u16 {
    5050
}

fn default_ledger_url() -> Url {
    Url::parse("http://localhost:5050").expect("hardcoded URL must parse")
}

fn default_share_base_url() -> Url {
    Url::parse("http://localhost:8080/watch").expect("hardcoded URL must parse")
}

fn default_settle_delay_ms() -> u64 {
    common::signaling::DEFAULT_SETTLE_DELAY.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    common::signaling::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            ledger_url: default_ledger_url(),
            ledger_port: default_ledger_port(),
            share_base_url: default_share_base_url(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// The stream secret kept in the app directory as base64 text
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(encoded) => Ok(Some(encoded.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeyError::Store(e.into())),
        }
    }

    fn save(&self, encoded_secret: &str) -> Result<(), KeyError> {
        fs::write(&self.path, encoded_secret).map_err(|e| KeyError::Store(e.into()))
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the app directory (~/.webrtc-live)
    pub app_dir: PathBuf,
    /// Path to the stream secret
    pub key_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the app directory path (custom or default ~/.webrtc-live)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new app directory with a fresh stream key
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if app_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }
        fs::create_dir_all(&app_dir)?;

        let key_path = app_dir.join(KEY_FILE_NAME);
        KeyPair::load_or_create(&FileSecretStore::new(&key_path))
            .map_err(|e| StateError::InvalidKey(e.to_string()))?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            app_dir,
            key_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the app directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;
        if !app_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = app_dir.join(KEY_FILE_NAME);
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            app_dir,
            key_path,
            config_path,
            config,
        })
    }

    /// Load our stream key pair from the key file
    pub fn load_key(&self) -> Result<KeyPair, StateError> {
        let store = FileSecretStore::new(&self.key_path);
        match store.load() {
            Ok(Some(encoded)) => {
                KeyPair::from_base64(&encoded).map_err(|e| StateError::InvalidKey(e.to_string()))
            }
            Ok(None) => Err(StateError::MissingFile(KEY_FILE_NAME.to_string())),
            Err(e) => Err(StateError::InvalidKey(e.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("app directory not initialized. Run 'webrtc-live init' first")]
    NotInitialized,

    #[error("app directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

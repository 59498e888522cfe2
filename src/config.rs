//! Session configuration
//!
//! Connection parameters for a single host, plus the timing and terminal
//! settings shared by every session a cache creates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Environment variable naming the automation framework root
pub const FRAMEWORK_HOME_ENV: &str = "ZTAF_HOME";

/// Resource directory relative to the framework root (or the working directory)
pub const RESOURCE_SUBDIR: &str = "z_components/eve/resources";

/// File name of the default private key inside the resource directory
pub const DEFAULT_KEY_FILE: &str = "ztest-ssh-key";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Credential used to authenticate against a host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Password authentication
    Password { password: String },

    /// Private key file
    Key { key_path: PathBuf },

    /// The framework's default key (see [`SessionSettings::default_key_path`])
    DefaultKey,
}

impl Credential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: impl Into<PathBuf>) -> Self {
        Self::Key {
            key_path: key_path.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f.write_str("Password(<redacted>)"),
            Credential::Key { key_path } => write!(f, "Key({})", key_path.display()),
            Credential::DefaultKey => f.write_str("DefaultKey"),
        }
    }
}

/// Connection parameters for one host
///
/// Immutable once a session is built from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Credential; hosts without a password fall back to the default key
    #[serde(default = "default_credential")]
    pub credential: Credential,
}

fn default_port() -> u16 {
    22
}

fn default_credential() -> Credential {
    Credential::DefaultKey
}

impl ConnectionParameters {
    /// Create parameters with password authentication
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            credential: Credential::password(password),
        }
    }

    /// Create parameters with key authentication
    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            credential: Credential::key(key_path),
        }
    }

    /// Create parameters that authenticate with the default key
    pub fn with_default_key(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            credential: Credential::DefaultKey,
        }
    }

    /// `host:port` for log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Order-independent identity of the full parameter set.
    ///
    /// Every present field contributes a `name=value` pair; pairs are sorted
    /// by name before hashing, so two parameter sets are equal exactly when
    /// they carry the same fields with the same values.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut fields: BTreeMap<&'static str, String> = BTreeMap::new();
        fields.insert("host", self.host.clone());
        fields.insert("port", self.port.to_string());
        fields.insert("username", self.username.clone());
        match &self.credential {
            Credential::Password { password } => {
                fields.insert("password", password.clone());
            }
            Credential::Key { key_path } => {
                fields.insert("key_path", key_path.to_string_lossy().into_owned());
            }
            Credential::DefaultKey => {}
        }

        let mut hasher = Sha256::new();
        for (name, value) in &fields {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Fingerprint(digest)
    }
}

/// Cache key derived from [`ConnectionParameters`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Pseudo-terminal requested for the interactive shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyConfig {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_cols() -> u32 {
    120
}

fn default_rows() -> u32 {
    40
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// Timing, terminal and path settings shared by all sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Transport connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between connection attempts in seconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Wait after an interactive command before reading its output
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// Upper bound on a single shell write
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Interval between reconnect attempts after a reboot
    #[serde(default = "default_reboot_poll")]
    pub reboot_poll_secs: u64,

    /// Give up reconnecting after a reboot once this much time has passed
    #[serde(default = "default_reboot_ceiling")]
    pub reboot_ceiling_secs: u64,

    /// How long a cached session may be reused
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Interactive shell terminal
    #[serde(default)]
    pub pty: PtyConfig,

    /// Key used for hosts configured without a password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_key_path: Option<PathBuf>,

    /// Directory holding the default key and output dumps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_backoff() -> u64 {
    15
}

fn default_settle() -> u64 {
    10
}

fn default_io_timeout() -> u64 {
    30
}

fn default_reboot_poll() -> u64 {
    5
}

fn default_reboot_ceiling() -> u64 {
    300
}

fn default_ttl() -> u64 {
    5 * 60
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            settle_secs: default_settle(),
            io_timeout_secs: default_io_timeout(),
            reboot_poll_secs: default_reboot_poll(),
            reboot_ceiling_secs: default_reboot_ceiling(),
            ttl_secs: default_ttl(),
            pty: PtyConfig::default(),
            default_key_path: None,
            resource_dir: None,
        }
    }
}

impl SessionSettings {
    /// Load settings from a JSON file; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Settings file {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn reboot_poll(&self) -> Duration {
        Duration::from_secs(self.reboot_poll_secs)
    }

    pub fn reboot_ceiling(&self) -> Duration {
        Duration::from_secs(self.reboot_ceiling_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Resource directory: explicit setting, then `$ZTAF_HOME/<subdir>`,
    /// then `<subdir>` relative to the working directory
    pub fn resource_dir(&self) -> PathBuf {
        if let Some(dir) = &self.resource_dir {
            return dir.clone();
        }
        match std::env::var_os(FRAMEWORK_HOME_ENV) {
            Some(home) => PathBuf::from(home).join(RESOURCE_SUBDIR),
            None => PathBuf::from(RESOURCE_SUBDIR),
        }
    }

    /// Key used for [`Credential::DefaultKey`]
    pub fn default_key_path(&self) -> PathBuf {
        self.default_key_path
            .clone()
            .unwrap_or_else(|| self.resource_dir().join(DEFAULT_KEY_FILE))
    }
}

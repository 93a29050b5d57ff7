//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::wire::MAX_CHUNK_SIZE;

/// Top-level configuration, shared by `ferryd` and `ferry-ctl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix for log lines, to tell several servers apart.
    pub my_id: String,
    /// Address to bind in plaintext and TLS modes.
    pub host: String,
    /// Port clients dial in plaintext and TLS modes.
    pub external_port: u16,
    /// Loopback-only port in tunnel mode; the tunnel endpoint forwards here.
    pub internal_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub my_id: String,
    pub server_host: String,
    pub server_port: u16,
    /// Local end of the SSH forward, dialed in tunnel mode.
    pub tunnel_host: String,
    pub tunnel_port: u16,
    /// Name the server certificate must be valid for (TLS mode).
    pub server_name_override: String,
    /// Size of the generated benchmark payload.
    pub payload_megabytes: u64,
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub mode: SecurityMode,
    /// Server certificate chain, PEM (TLS, server side).
    pub cert_path: Option<PathBuf>,
    /// Server private key, PEM (TLS, server side).
    pub key_path: Option<PathBuf>,
    /// Trust root for the server certificate, PEM (TLS, client side).
    pub ca_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sink: SinkKind,
    /// Directory for `file`, database file for `sqlite`. Unused otherwise.
    pub path: PathBuf,
}

/// How the byte stream under a transfer is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Raw TCP, for networks that already encrypt (VPN).
    #[default]
    Plaintext,
    /// TLS over TCP.
    Tls,
    /// Plaintext over a pre-established SSH forward.
    Tunnel,
}

/// Where verified payload bytes go on the receiving side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Verify, then drop.
    #[default]
    Discard,
    Memory,
    File,
    Sqlite,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            my_id: "ferryd".to_string(),
            host: "127.0.0.1".to_string(),
            external_port: 10000,
            internal_port: 10001,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            my_id: "ferry-ctl".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 10000,
            tunnel_host: "127.0.0.1".to_string(),
            tunnel_port: 10001,
            server_name_override: "localhost".to_string(),
            payload_megabytes: 128,
            chunk_size: 1 << 20, // 1 MiB
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Discard,
            path: data_dir().join("received"),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

impl FromStr for SecurityMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" | "none" => Ok(Self::Plaintext),
            "tls" => Ok(Self::Tls),
            "tunnel" | "ssh" => Ok(Self::Tunnel),
            other => Err(ConfigError::UnknownValue("security.mode", other.to_string())),
        }
    }
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard" => Ok(Self::Discard),
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::UnknownValue("storage.sink", other.to_string())),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("unknown value for {0}: '{1}'")]
    UnknownValue(&'static str, String),
    #[error("must provide {0} under TLS")]
    MissingPath(&'static str),
    #[error("{0} '{1}' does not exist")]
    PathNotFound(&'static str, PathBuf),
    #[error("chunk size {0} must be between 1 and {}", MAX_CHUNK_SIZE)]
    InvalidChunkSize(usize),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_file(&Self::file_path())
    }

    /// Load an explicit file, then apply env overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a specific file without env overrides. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&FerryConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FERRY_SECURITY__MODE") {
            if let Ok(mode) = v.parse() {
                self.security.mode = mode;
            }
        }
        if let Some(v) = lookup("FERRY_SERVER__HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("FERRY_SERVER__EXTERNAL_PORT") {
            if let Ok(p) = v.parse() {
                self.server.external_port = p;
            }
        }
        if let Some(v) = lookup("FERRY_CLIENT__SERVER_HOST") {
            self.client.server_host = v;
        }
        if let Some(v) = lookup("FERRY_CLIENT__SERVER_PORT") {
            if let Ok(p) = v.parse() {
                self.client.server_port = p;
            }
        }
        if let Some(v) = lookup("FERRY_STORAGE__SINK") {
            if let Ok(sink) = v.parse() {
                self.storage.sink = sink;
            }
        }
        if let Some(v) = lookup("FERRY_STORAGE__PATH") {
            self.storage.path = PathBuf::from(v);
        }
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Checks the server side needs: TLS key material must exist.
    pub fn validate_server(&self) -> Result<(), ConfigError> {
        if self.security.mode == SecurityMode::Tls {
            require_file("security.key_path", self.security.key_path.as_deref())?;
            require_file("security.cert_path", self.security.cert_path.as_deref())?;
        }
        Ok(())
    }

    /// Checks the client side needs: a trust root under TLS, a sane chunk size.
    pub fn validate_client(&self) -> Result<(), ConfigError> {
        if self.security.mode == SecurityMode::Tls {
            require_file("security.ca_path", self.security.ca_path.as_deref())?;
        }
        let size = self.client.chunk_size;
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(size));
        }
        Ok(())
    }

    /// `host:port` the server binds for the configured mode. Tunnel mode
    /// keeps the service on loopback, reachable only through the tunnel.
    pub fn listen_addr(&self) -> String {
        match self.security.mode {
            SecurityMode::Plaintext | SecurityMode::Tls => {
                format!("{}:{}", self.server.host, self.server.external_port)
            }
            SecurityMode::Tunnel => format!("127.0.0.1:{}", self.server.internal_port),
        }
    }

    /// `host:port` the client dials for the configured mode.
    pub fn dial_addr(&self) -> String {
        match self.security.mode {
            SecurityMode::Plaintext | SecurityMode::Tls => {
                format!("{}:{}", self.client.server_host, self.client.server_port)
            }
            SecurityMode::Tunnel => {
                format!("{}:{}", self.client.tunnel_host, self.client.tunnel_port)
            }
        }
    }
}

fn require_file(key: &'static str, path: Option<&Path>) -> Result<(), ConfigError> {
    match path {
        None => Err(ConfigError::MissingPath(key)),
        Some(p) if p.as_os_str().is_empty() => Err(ConfigError::MissingPath(key)),
        Some(p) if !p.exists() => Err(ConfigError::PathNotFound(key, p.to_path_buf())),
        Some(_) => Ok(()),
    }
}

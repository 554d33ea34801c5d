//! Configuration loading.
//!
//! A single TOML file deserialized into a typed [`Config`] that is passed to
//! each component at construction. Every key has a default so a minimal file
//! only needs the edge id and the cloud token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Core version used for the connector compatibility check. Defaults to
    /// the crate version; overridable for tests and packaging.
    pub version: String,
    pub ws_port: u16,
    pub log_level: String,
    pub log_format: String,
    pub core: CoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ws_port: 9000,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            core: CoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Object id of this edge in the cloud.
    pub id: String,
    /// Per-call deadline for connector requests.
    #[serde(deserialize_with = "de_duration")]
    pub rpc_timeout: Duration,
    pub db: DbConfig,
    pub mqtt: MqttConfig,
    pub cloud: CloudConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            rpc_timeout: Duration::from_secs(60),
            db: DbConfig::default(),
            mqtt: MqttConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
    pub clean_state: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage.db"),
            clean_state: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub url: String,
    /// Client certificate pair; both required for TLS client auth.
    pub cert_file: String,
    pub key_path: String,
    /// CA bundle for broker verification; defaults to `cert_file` when empty.
    pub ca_file: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: "tls://sandbox.rightech.io:8883".to_string(),
            cert_file: String::new(),
            key_path: String::new(),
            ca_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub url: String,
    pub token: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: "https://sandbox.rightech.io/api/v1".to_string(),
            token: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Parse a duration written as `100ms`, `30s`, `5m`, `2h` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let n: u64 = num
        .parse()
        .map_err(|_| format!("invalid duration: {s:?}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("invalid duration unit: {unit:?}")),
    }
}

fn de_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(de)? {
        Raw::Secs(n) => Ok(Duration::from_secs(n)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

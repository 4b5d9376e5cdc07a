use serde::Deserialize;
use std::{path::Path, path::PathBuf, time::Duration};
use thiserror::Error;
use tokio::fs;

use super::endpoints::{self, EndpointFileEntry, EndpointRecord};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2);
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_STREAM_BUFFER: usize = 64;
const DEFAULT_ENDPOINT_QUARANTINE: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ----- GatewayConfig ---------------------------------------------------------

/// Whole gateway configuration file. Loaded once at startup and handed to the
/// constructors that need it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub settings: GatewayFileSettings,
    pub endpoints: Vec<EndpointRecord>,
}

/// The `[gateway]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayFileSettings {
    /// Wait between two attempts of the same shard call.
    #[serde(deserialize_with = "de_duration")]
    pub retry_delay: Duration,

    /// Total attempts per shard call, including the first.
    pub retry_count: u32,

    /// Cap on concurrently registered sessions.
    pub max_sessions: Option<usize>,

    /// Idle time after which an unleased session is reaped.
    #[serde(deserialize_with = "de_opt_duration")]
    pub session_timeout: Option<Duration>,

    /// Capacity of the channel shard streams are multiplexed through.
    pub stream_buffer: usize,

    /// How long a marked-down endpoint is skipped by the selector.
    #[serde(deserialize_with = "de_duration")]
    pub endpoint_quarantine: Duration,
}

impl Default for GatewayFileSettings {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_count: DEFAULT_RETRY_COUNT,
            max_sessions: None,
            session_timeout: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            endpoint_quarantine: DEFAULT_ENDPOINT_QUARANTINE,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayConfig: Static -------------------------------------------------

impl GatewayConfig {
    pub async fn from_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<GatewayConfig, ConfigError> {
        let doc: GatewayFile = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;

        validate(&doc.gateway)?;
        let endpoints = endpoints::into_records(doc.endpoints)?;

        Ok(GatewayConfig {
            settings: doc.gateway,
            endpoints,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    gateway: GatewayFileSettings,

    #[serde(default)]
    endpoints: Vec<EndpointFileEntry>,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn validate(settings: &GatewayFileSettings) -> Result<(), ConfigError> {
    if settings.retry_count == 0 {
        return Err(ConfigError::InvalidField("gateway.retry_count".into()));
    }
    if settings.stream_buffer == 0 {
        return Err(ConfigError::InvalidField("gateway.stream_buffer".into()));
    }
    if settings.max_sessions == Some(0) {
        return Err(ConfigError::InvalidField("gateway.max_sessions".into()));
    }
    Ok(())
}

/// Accepts a humantime string ("250ms", "30m") or integer milliseconds.
fn de_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    d.deserialize_any(DurationVisitor)
}

fn de_opt_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    d.deserialize_any(DurationVisitor).map(Some)
}

struct DurationVisitor;

impl<'de> serde::de::Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a duration such as \"250ms\" or integer milliseconds")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Duration::from_millis(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v < 0 {
            return Err(E::invalid_value(serde::de::Unexpected::Signed(v), &self));
        }
        Ok(Duration::from_millis(v as u64))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        humantime::parse_duration(v)
            .map_err(|e| E::custom(format!("invalid duration '{v}': {e}")))
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate [[endpoints]] entry for {target}")]
    DuplicateEndpoint { target: String },

    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

//! Configuration loading, defaults and validation.
//!
//! The raw TOML `[harvester]` section is deserialized into
//! [`HarvesterSection`], then checked and defaulted into the immutable
//! [`HarvestSettings`] the engine runs on. Any [`ConfigError`] is fatal: the
//! scheduler never starts on a bad config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::model::{Credentials, Endpoint, ExecuteMode, TransportKind};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_PERIOD: &str = "10s";
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_CONNECT_TYPE: TransportKind = TransportKind::Ftp;
pub const DEFAULT_USERNAME: &str = "harvester_user";
pub const DEFAULT_PASSWORD: &str = "harvester_pass";
pub const DEFAULT_REMOTE_DIRECTORY: &str = "~/";
pub const DEFAULT_LOCAL_DIRECTORY: &str = "./";
pub const DEFAULT_EXECUTE_TYPE: ExecuteMode = ExecuteMode::Get;
pub const DEFAULT_OPERATION_TIMEOUT: &str = "30s";

/// Bound on dialing the remote server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Error reading config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("There are no files to get")]
    NoFiles,

    #[error("Unknown [{0}] Connection type, supported types: `ftp`, `sftp`")]
    UnknownConnectType(String),

    #[error("Unknown [{0}] Execute type, supported types: `read`, `get`")]
    UnknownExecuteType(String),

    #[error("Unknown [{0}] cycle failure policy, supported policies: `stop`, `skip`")]
    UnknownFailurePolicy(String),

    #[error("Invalid duration for '{field}' ({value}): {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

// ============================================================================
// Raw config
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub harvester: HarvesterSection,
}

/// The `[harvester]` table as written by the operator. Every field is optional
/// except `files`, whose absence is caught during validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HarvesterSection {
    pub period: Option<String>,
    pub connecttype: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<PortSetting>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remotedirectory: Option<String>,
    pub currentdirectory: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<String>,
    pub executetype: Option<String>,
    pub operationtimeout: Option<String>,
    pub oncyclefailure: Option<String>,
    pub hostkeyfingerprint: Option<String>,
}

/// `port` may be written as a number or, for older configs, a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortSetting {
    Number(u16),
    Text(String),
}

impl PortSetting {
    /// `None` for an empty string, which counts as "not selected".
    fn resolve(self) -> Result<Option<u16>, ConfigError> {
        match self {
            PortSetting::Number(port) => Ok(Some(port)),
            PortSetting::Text(raw) if raw.trim().is_empty() => Ok(None),
            PortSetting::Text(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidPort(raw)),
        }
    }
}

// ============================================================================
// Validated settings
// ============================================================================

/// What the scheduler does when a cycle aborts on connect/authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleFailurePolicy {
    /// Propagate the error and end polling.
    Stop,
    /// Log the error and wait for the next tick.
    Skip,
}

impl std::str::FromStr for CycleFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(CycleFailurePolicy::Stop),
            "skip" => Ok(CycleFailurePolicy::Skip),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub transport: TransportKind,
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub remote_directory: String,
    pub local_directory: PathBuf,
    pub period: Duration,
    pub mode: ExecuteMode,
    pub patterns: Vec<String>,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub on_cycle_failure: CycleFailurePolicy,
    pub host_key_fingerprint: Option<String>,
}

impl HarvestSettings {
    /// Logs the effective settings. The password is never printed.
    pub fn log_summary(&self) {
        info!("===========================================================");
        info!("Period          : {:?}", self.period);
        info!("ConnectType     : {}", self.transport);
        info!("Hostname        : {}", self.endpoint.host);
        info!("Port            : {}", self.endpoint.port);
        info!("Username        : {}", self.credentials.username);
        info!("RemoteDirectory : {}", self.remote_directory);
        info!("LocalDirectory  : {}", self.local_directory.display());
        info!("Files           : {:?}", self.patterns);
        info!("ExecuteType     : {}", self.mode);
        info!("===========================================================");

        info!("Total # of files to get : {}", self.patterns.len());
        for (index, pattern) in self.patterns.iter().enumerate() {
            info!("Read #{} : {}", index + 1, pattern);
        }
    }
}

impl HarvesterSection {
    /// Applies defaults and validates the section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `files` is empty, an enumerated option has
    /// an unknown value, a duration cannot be parsed, or the port is zero.
    pub fn into_settings(self) -> Result<HarvestSettings, ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::NoFiles);
        }

        let period = or_default(selected(self.period), "Period", DEFAULT_PERIOD.to_string());
        let period = parse_duration("period", &period)?;

        let transport = match selected(self.connecttype) {
            Some(raw) => raw
                .parse::<TransportKind>()
                .map_err(ConfigError::UnknownConnectType)?,
            None => {
                info!(
                    "Connection Type not selected, proceeding with '{}' as default",
                    DEFAULT_CONNECT_TYPE
                );
                DEFAULT_CONNECT_TYPE
            }
        };

        let host = or_default(selected(self.hostname), "Hostname", DEFAULT_HOSTNAME.to_string());
        let port = match self.port {
            Some(port) => port.resolve()?,
            None => None,
        };
        let port = or_default(port, "Port", DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }

        let username = or_default(selected(self.username), "Username", DEFAULT_USERNAME.to_string());
        let password = match selected(self.password) {
            Some(password) => password,
            None => {
                info!("Password not selected, proceeding with default password");
                DEFAULT_PASSWORD.to_string()
            }
        };

        let remote_directory = or_default(
            selected(self.remotedirectory),
            "Remote Directory",
            DEFAULT_REMOTE_DIRECTORY.to_string(),
        );
        let local_directory = match self.currentdirectory.filter(|dir| !dir.as_os_str().is_empty()) {
            Some(dir) => dir,
            None => {
                info!(
                    "Current Directory not selected, proceeding with '{}' as default",
                    DEFAULT_LOCAL_DIRECTORY
                );
                PathBuf::from(DEFAULT_LOCAL_DIRECTORY)
            }
        };

        let mode = match selected(self.executetype) {
            Some(raw) => raw
                .parse::<ExecuteMode>()
                .map_err(ConfigError::UnknownExecuteType)?,
            None => {
                info!(
                    "Execute Type not selected, proceeding with '{}' as default",
                    DEFAULT_EXECUTE_TYPE
                );
                DEFAULT_EXECUTE_TYPE
            }
        };

        let operation_timeout = selected(self.operationtimeout)
            .unwrap_or_else(|| DEFAULT_OPERATION_TIMEOUT.to_string());
        let operation_timeout = parse_duration("operationtimeout", &operation_timeout)?;

        let on_cycle_failure = match selected(self.oncyclefailure) {
            Some(raw) => raw
                .parse::<CycleFailurePolicy>()
                .map_err(ConfigError::UnknownFailurePolicy)?,
            None => CycleFailurePolicy::Stop,
        };
        let host_key_fingerprint = selected(self.hostkeyfingerprint);

        Ok(HarvestSettings {
            transport,
            endpoint: Endpoint { host, port },
            credentials: Credentials { username, password },
            remote_directory,
            local_directory,
            period,
            mode,
            patterns: self.files,
            connect_timeout: CONNECT_TIMEOUT,
            operation_timeout,
            on_cycle_failure,
            host_key_fingerprint,
        })
    }
}

/// An empty string counts as "not selected".
fn selected(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn or_default<T: std::fmt::Debug>(value: Option<T>, label: &str, default: T) -> T {
    match value {
        Some(value) => value,
        None => {
            info!("{} not selected, proceeding with {:?} as default", label, default);
            default
        }
    }
}

/// Parses the `[harvester]` section out of TOML text.
pub fn parse_config(contents: &str) -> Result<HarvestSettings, ConfigError> {
    let file: ConfigFile = toml::from_str(contents)?;
    file.harvester.into_settings()
}

/// Reads and validates the config file at `path`.
pub async fn load_config(path: &Path) -> Result<HarvestSettings, ConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse_config(&contents)
}

// ============================================================================
// Durations
// ============================================================================

/// Parses Go-style durations: a sequence of decimal numbers, each with a unit
/// suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `10s`, `1m30s`,
/// `1.5h`. Zero is rejected since it cannot drive a ticker.
pub fn parse_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        field,
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];

        total_nanos += value * scale;
    }

    if total_nanos < 1.0 {
        return Err(invalid("duration must be positive"));
    }
    if total_nanos > u64::MAX as f64 {
        return Err(invalid("duration overflows"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

// ============================================================================
// Tests
// ============================================================================

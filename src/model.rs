use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire protocol used to reach the remote file server.
///
/// The lowercase name doubles as the `type` label on every emitted [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ftp,
    Sftp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Ftp => "ftp",
            TransportKind::Sftp => "sftp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ftp" => Ok(TransportKind::Ftp),
            "sftp" => Ok(TransportKind::Sftp),
            other => Err(other.to_string()),
        }
    }
}

/// How a resolved file is turned into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteMode {
    /// Stream lines straight from the remote file.
    Read,
    /// Copy the remote file into the local directory, then stream the copy.
    Get,
}

impl ExecuteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecuteMode::Read => "read",
            ExecuteMode::Get => "get",
        }
    }
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecuteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ExecuteMode::Read),
            "get" => Ok(ExecuteMode::Get),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One harvested line, ready for the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub kind: TransportKind,

    pub message: String,
}

impl Event {
    /// Stamps `message` with the current instant.
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_beat_field_names() {
        let event = Event::new(TransportKind::Sftp, "hello");
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "sftp");
        assert_eq!(json["message"], "hello");
        assert!(json["@timestamp"].is_string());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "harvest".to_string(),
            password: "s3cret".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("harvest"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_kind_and_mode_parse() {
        assert_eq!("ftp".parse::<TransportKind>(), Ok(TransportKind::Ftp));
        assert_eq!("sftp".parse::<TransportKind>(), Ok(TransportKind::Sftp));
        assert!("scp".parse::<TransportKind>().is_err());
        assert_eq!("read".parse::<ExecuteMode>(), Ok(ExecuteMode::Read));
        assert_eq!("get".parse::<ExecuteMode>(), Ok(ExecuteMode::Get));
        assert!("put".parse::<ExecuteMode>().is_err());
    }
}

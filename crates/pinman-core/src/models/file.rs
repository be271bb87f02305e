use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// System-wide file identifier, opaque to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow::anyhow!("File id cannot be empty"));
        }
        Ok(FileId(s.to_string()))
    }
}

/// Whether a replica of the file is expected to be directly accessible
/// or has to be staged from nearline (archival) storage first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessLatency {
    Online,
    Nearline,
}

/// File attributes as supplied by the namespace service.
///
/// Pool selection needs the storage class and access latency; requests may
/// arrive with only the file id, in which case the missing attributes are
/// fetched from the namespace before selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttributes {
    pub file_id: FileId,
    pub storage_class: Option<String>,
    pub hsm: Option<String>,
    pub access_latency: Option<AccessLatency>,
    /// Names of pools known to hold a replica.
    pub locations: Vec<String>,
}

impl FileAttributes {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            storage_class: None,
            hsm: None,
            access_latency: None,
            locations: Vec::new(),
        }
    }

    /// True if everything pool selection requires is present.
    pub fn is_complete(&self) -> bool {
        self.storage_class.is_some() && self.access_latency.is_some()
    }
}

/// Identity of the requester, used for authorization and accounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub uid: i64,
    pub gid: i64,
    /// Distinguished name, when the request came in over an authenticated
    /// channel. Stage-permission rules match against it.
    pub dn: Option<String>,
}

impl Owner {
    pub fn new(uid: i64, gid: i64) -> Self {
        Self { uid, gid, dn: None }
    }

    pub fn with_dn(uid: i64, gid: i64, dn: impl Into<String>) -> Self {
        Self {
            uid,
            gid,
            dn: Some(dn.into()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Protocol and client information forwarded to pool selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub protocol: String,
    pub client_host: String,
}

impl ProtocolInfo {
    pub fn new(protocol: impl Into<String>, client_host: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            client_host: client_host.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_round_trips_through_from_str() {
        let id: FileId = "0000A1B2C3".parse().unwrap();
        assert_eq!(id.to_string(), "0000A1B2C3");
    }

    #[test]
    fn empty_file_id_rejected() {
        assert!("".parse::<FileId>().is_err());
    }

    #[test]
    fn attributes_complete_only_with_class_and_latency() {
        let mut attrs = FileAttributes::new(FileId::new("F1"));
        assert!(!attrs.is_complete());
        attrs.storage_class = Some("data:tape".to_string());
        assert!(!attrs.is_complete());
        attrs.access_latency = Some(AccessLatency::Nearline);
        assert!(attrs.is_complete());
    }
}

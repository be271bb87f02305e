use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::file::FileId;

/// Lifecycle state of a pin record.
///
/// `Pinning` and `Unpinning` records are owned by at most one protocol
/// instance at a time; transitions out of them are only made through
/// sticky+state guarded conditional updates in the record store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text"))]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    Pinning,
    Pinned,
    Unpinning,
}

impl Display for PinState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PinState::Pinning => write!(f, "pinning"),
            PinState::Pinned => write!(f, "pinned"),
            PinState::Unpinning => write!(f, "unpinning"),
        }
    }
}

impl FromStr for PinState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinning" => Ok(PinState::Pinning),
            "pinned" => Ok(PinState::Pinned),
            "unpinning" => Ok(PinState::Unpinning),
            _ => Err(anyhow::anyhow!("Invalid pin state: {}", s)),
        }
    }
}

/// A durable pin record.
///
/// While in `Pinning`, `expires_at` is the protocol-step deadline (time
/// budget for namespace lookup, pool selection or sticky-flag placement).
/// Once `Pinned`, it becomes the semantic pin lifetime; `None` means the
/// pin lives until explicitly unpinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    pub pin_id: i64,
    pub file_id: FileId,
    /// Caller-supplied idempotency key; cleared when a resubmission
    /// supersedes this record.
    pub request_id: Option<String>,
    pub uid: i64,
    pub gid: i64,
    pub state: PinState,
    /// Pool holding the sticky reservation; set no earlier than successful
    /// pool selection, never cleared while `Pinned`.
    pub pool: Option<String>,
    /// Opaque sticky-flag token, generated once at creation, never reused.
    pub sticky: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Pin {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Pin {
            pin_id: row.get("pin_id"),
            file_id: FileId::new(row.get::<String, _>("file_id")),
            request_id: row.get("request_id"),
            uid: row.get("uid"),
            gid: row.get("gid"),
            state: row
                .get::<String, _>("state")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse state: {}", e).into()))?,
            pool: row.get("pool"),
            sticky: row.get("sticky"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

impl Pin {
    /// True if the pin has an expiration and it lies at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }

    /// True if the given uid may release or extend this pin.
    pub fn is_owned_by(&self, uid: i64) -> bool {
        self.uid == uid
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pinman_core::models::{FileAttributes, FileId, ProtocolInfo};

/// Request to the pool-selection service for a pool able to serve a read.
///
/// `allow_staging` carries the stage-permission decision: when false the
/// selector must restrict itself to pools that already hold the file online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectReadPool {
    pub attributes: FileAttributes,
    pub protocol: ProtocolInfo,
    pub allow_staging: bool,
}

/// Successful pool-selection outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSelection {
    pub pool: String,
}

/// Command to set or clear a sticky flag on a pool.
///
/// The flag is keyed by the pin's sticky token so that independent pins on
/// the same pool file can be released independently. `expires_at = None`
/// keeps the flag until explicitly cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSticky {
    pub pool: String,
    pub file_id: FileId,
    pub sticky: String,
    pub on: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

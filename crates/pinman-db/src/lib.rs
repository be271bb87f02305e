//! Pin record store
//!
//! Durable table of pin records plus the `PinDao` contract the coordinator
//! is written against. State transitions out of `Pinning` are single atomic
//! conditional updates guarded by the sticky token and the expected state,
//! so a stale protocol step can never advance a record it no longer owns.

pub mod db;

pub use db::pin::{Admission, PgPinDao, PinDao};

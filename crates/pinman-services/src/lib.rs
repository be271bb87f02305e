//! Pinman Service Layer
//!
//! This crate hosts the pin lifecycle coordinator: the pin request
//! processor driving the multi-step pinning protocol, the background
//! sweepers reconciling pool-side sticky flags, the coordinator facade,
//! and the bulk job registry. Keep protocol logic here; persistence lives
//! in pinman-db and collaborator contracts in pinman-remote.

pub mod bulk;
pub mod coordinator;
pub mod expiration;
pub mod pinner;
pub mod unpinner;

pub use bulk::{BulkOutcome, JobKind, JobRegistry, JobState, JobStatus};
pub use coordinator::{PinCoordinator, SweeperHandles};
pub use expiration::ExpirationSweeper;
pub use pinner::{PinReply, PinRequest, PinRequestProcessor};
pub use unpinner::{UnpinStats, UnpinSweeper};

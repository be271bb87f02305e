//! Remote collaborator contracts
//!
//! The coordinator talks to three external services: the pool-selection
//! service, the pools themselves, and the namespace. This crate defines
//! their abstract contracts and the error taxonomy the retry policy is
//! written against. Wire formats and transports are implementation details
//! of the trait impls, not of this crate.

pub mod messages;
pub mod traits;

pub use messages::{PoolSelection, SelectReadPool, SetSticky};
pub use traits::{Namespace, PoolManager, Pools, RemoteError, RemoteResult};

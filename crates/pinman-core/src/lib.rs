//! Pinman Core Library
//!
//! This crate provides the domain models, error types, configuration, and the
//! stage-permission check shared by all pinman components.

pub mod config;
pub mod error;
pub mod models;
pub mod stage;

// Re-export commonly used types
pub use config::PinManagerConfig;
pub use error::PinError;
pub use stage::{StagePermission, StageRule};

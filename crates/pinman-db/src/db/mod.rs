//! Database repositories for the pin record store.
pub mod pin;

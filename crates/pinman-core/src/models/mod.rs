pub mod file;
pub mod pin;

pub use file::{AccessLatency, FileAttributes, FileId, Owner, ProtocolInfo};
pub use pin::{Pin, PinState};

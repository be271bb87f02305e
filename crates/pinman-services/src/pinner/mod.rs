pub mod processor;
pub(crate) mod task;

pub use processor::{PinReply, PinRequest, PinRequestProcessor};

pub mod sweeper;

pub use sweeper::{UnpinStats, UnpinSweeper};

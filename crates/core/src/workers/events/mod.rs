pub mod stage_failed;

pub use stage_failed::*;

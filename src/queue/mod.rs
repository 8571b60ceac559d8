pub mod builder;

pub use builder::{build_queue, total_seconds};

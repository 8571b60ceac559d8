pub mod definitions;
pub mod snapshots;

pub use definitions::StoredDefinition;

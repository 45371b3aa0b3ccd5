pub mod entity_ids;
pub mod id;

pub use entity_ids::*;

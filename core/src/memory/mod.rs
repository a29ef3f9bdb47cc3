pub mod r#trait;

mod types;

pub use r#trait::{Knowledge, Memory};
pub use types::{render_hits, KnowledgeHit, MemoryRecord};

pub mod keyword;

pub use keyword::{KeywordKnowledge, KnowledgeDocument};

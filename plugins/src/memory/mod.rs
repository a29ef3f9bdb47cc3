//! Memory backends.

pub mod jsonl;

pub use jsonl::JsonlMemoryStore;

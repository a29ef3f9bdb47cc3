pub mod replay;

pub use replay::{ReplayAgent, ReplayEntry};

mod events;
mod lifecycle;

pub use events::{AsyncEventHandler, EngineEvent, EventHandler, EventKind, EventRegistry};
pub use lifecycle::TaskHooks;

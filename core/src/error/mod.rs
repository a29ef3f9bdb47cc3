pub mod decision;
pub mod executor;
pub mod registry;

pub use decision::DecisionParseError;
pub use executor::ExecutorError;
pub use registry::RegistryError;

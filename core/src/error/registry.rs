use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Endpoint already registered on port {port}: {path}")]
    DuplicateEndpoint { port: u16, path: String },

    #[error("Invalid endpoint path: {0:?}")]
    InvalidPath(String),
}

use thiserror::Error;

/// Failures raised while assembling the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required host bridge was not supplied.
    #[error("{capability} not provided: {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

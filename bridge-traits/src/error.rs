use thiserror::Error;

/// Error reported by a host adapter.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Capability unavailable on this host: {0}")]
    NotAvailable(String),

    #[error("Adapter call failed: {0}")]
    OperationFailed(String),

    /// The platform API rejected or failed a listing request.
    #[error("{platform} request failed: {message}")]
    PlatformRequest { platform: String, message: String },

    #[error("Storage failure: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

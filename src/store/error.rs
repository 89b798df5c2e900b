use thiserror::Error;

/// Failure reported by the backing data store or its change stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The request never reached the store, or the connection dropped.
    #[error("transport error: {0}")]
    Transport(String),
    /// The session token was missing, expired, or lacked permission.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The store answered with an error.
    #[error("server error: {0}")]
    Server(String),
    /// An internal lock was poisoned while serving the request.
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

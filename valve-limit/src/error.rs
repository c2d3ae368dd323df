/// Errors produced while consulting the shared store.
///
/// Domain rejections (limit exceeded, lock busy) are not errors; they are returned
/// as [`crate::Decision`] and [`crate::Acquisition`] values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The store could not be reached, timed out, or replied with something unexpected.
    ///
    /// [`crate::FailOpen`] turns this variant into an admission.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller's cancellation signal fired while waiting for a lock.
    #[error("Cancelled while waiting for lock")]
    Cancelled,

    /// Configuration could not be loaded or failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

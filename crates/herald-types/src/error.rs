use thiserror::Error;

/// Error taxonomy shared by the store and the client managers.
///
/// Lookup and validation failures are values, not faults; `Io` is the one
/// variant callers may reasonably retry, and the core never retries it for
/// them (a retried write is a new side effect).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("unauthorized")]
    Unauthorized,

    /// Lost an atomic read-modify-write race (control-lock acquisition).
    #[error("conflict")]
    Conflict,

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Transient storage or transport failure; safe to surface for retry.
    #[error("storage error: {0}")]
    Io(String),
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Error::Invalid(reason.into())
    }
}

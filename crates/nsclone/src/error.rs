//! Clone orchestration error types.

/// Errors returned by clone orchestration.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already present: {0}")]
    AlreadyPresent(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Failure reported by an external collaborator (catalog, snapshot
    /// coordinator, tablet servers). The message is passed through verbatim.
    #[error("{0}")]
    Collaborator(String),

    #[cfg(feature = "full")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse category of a [`CloneError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneErrorKind {
    Configuration,
    InvalidArgument,
    AlreadyPresent,
    IllegalState,
    NotFound,
    Internal,
    Collaborator,
    Storage,
}

impl CloneError {
    pub fn kind(&self) -> CloneErrorKind {
        match self {
            Self::Configuration(_) => CloneErrorKind::Configuration,
            Self::InvalidArgument(_) => CloneErrorKind::InvalidArgument,
            Self::AlreadyPresent(_) => CloneErrorKind::AlreadyPresent,
            Self::IllegalState(_) => CloneErrorKind::IllegalState,
            Self::NotFound(_) => CloneErrorKind::NotFound,
            Self::Internal(_) => CloneErrorKind::Internal,
            Self::Collaborator(_) => CloneErrorKind::Collaborator,
            #[cfg(feature = "full")]
            Self::Database(_) => CloneErrorKind::Storage,
            Self::Serialization(_) => CloneErrorKind::Storage,
        }
    }
}

/// Errors raised by the content repository itself.
///
/// This mirrors the checked failure hierarchy of a content repository session.
/// Callers of this crate rarely see it directly: every public entry point
/// translates it into a [`DataAccessError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("item exists: {0}")]
    ItemExists(String),

    #[error("referential integrity violated: {0}")]
    ReferentialIntegrity(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("merge conflict: {0}")]
    MergeConflict(String),

    #[error("invalid item state: {0}")]
    InvalidItemState(String),

    #[error("lock conflict: {0}")]
    LockConflict(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid serialized data: {0}")]
    InvalidSerializedData(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("unsupported repository operation: {0}")]
    UnsupportedOperation(String),

    #[error("value format error: {0}")]
    ValueFormat(String),

    #[error("no such node type: {0}")]
    NoSuchNodeType(String),

    #[error("no such workspace: {0}")]
    NoSuchWorkspace(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("repository error: {0}")]
    Other(String),
}

/// Result type for calls made against the content repository.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Failure reported by a two-phase-commit resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("XA error {code}: {message}")]
pub struct XaError {
    pub code: i32,
    pub message: String,
}

impl XaError {
    /// Generic resource manager failure.
    pub const XAER_RMERR: i32 = -3;
    /// The transaction branch is not known to the resource.
    pub const XAER_NOTA: i32 = -4;
    /// Call made in an improper context.
    pub const XAER_PROTO: i32 = -6;
    /// The branch was rolled back by the resource.
    pub const XA_RBROLLBACK: i32 = 100;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result type for two-phase-commit resource calls.
pub type XaResult<T> = Result<T, XaError>;

/// The closed set of failure categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    PermissionDenied,
    IntegrityViolation,
    ConcurrencyConflict,
    RetrievalFailure,
    InvalidUsage,
    ResourceUnavailable,
    SystemFailure,
    UnexpectedRollback,
    ConfigurationError,
}

/// Error type for every operation exposed by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DataAccessError {
    #[error("permission denied: {0}")]
    PermissionDenied(#[source] RepositoryError),

    #[error("data integrity violation: {0}")]
    IntegrityViolation(#[source] RepositoryError),

    #[error("concurrency failure: {0}")]
    ConcurrencyConflict(#[source] RepositoryError),

    #[error("data retrieval failure: {0}")]
    RetrievalFailure(#[source] RepositoryError),

    #[error("invalid data access usage: {0}")]
    InvalidUsage(#[source] RepositoryError),

    #[error("resource unavailable: {message}")]
    ResourceUnavailable {
        message: String,
        #[source]
        source: RepositoryError,
    },

    #[error("repository system failure: {0}")]
    SystemFailure(#[source] RepositoryError),

    #[error("transaction rolled back because it has been marked as rollback-only: {0}")]
    UnexpectedRollback(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("transaction system failure: {message}")]
    TransactionSystem {
        message: String,
        #[source]
        source: XaError,
    },
}

impl DataAccessError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn transaction_system(message: impl Into<String>, source: XaError) -> Self {
        Self::TransactionSystem {
            message: message.into(),
            source,
        }
    }

    /// Wraps a failure to obtain a session from the repository.
    pub fn resource_unavailable(message: impl Into<String>, source: RepositoryError) -> Self {
        Self::ResourceUnavailable {
            message: message.into(),
            source,
        }
    }

    /// Returns the stable category for this error.
    ///
    /// Programming faults (`IllegalState`) count as invalid usage and
    /// two-phase-commit failures as system failures.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            Self::IntegrityViolation(_) => ErrorCategory::IntegrityViolation,
            Self::ConcurrencyConflict(_) => ErrorCategory::ConcurrencyConflict,
            Self::RetrievalFailure(_) => ErrorCategory::RetrievalFailure,
            Self::InvalidUsage(_) | Self::IllegalState(_) => ErrorCategory::InvalidUsage,
            Self::ResourceUnavailable { .. } => ErrorCategory::ResourceUnavailable,
            Self::SystemFailure(_) | Self::TransactionSystem { .. } => ErrorCategory::SystemFailure,
            Self::UnexpectedRollback(_) => ErrorCategory::UnexpectedRollback,
            Self::Configuration(_) => ErrorCategory::ConfigurationError,
        }
    }

    /// The native repository error this failure was translated from, if any.
    pub fn repository_error(&self) -> Option<&RepositoryError> {
        match self {
            Self::PermissionDenied(e)
            | Self::IntegrityViolation(e)
            | Self::ConcurrencyConflict(e)
            | Self::RetrievalFailure(e)
            | Self::InvalidUsage(e)
            | Self::SystemFailure(e) => Some(e),
            Self::ResourceUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type for operations exposed by this crate.
pub type DataAccessResult<T> = Result<T, DataAccessError>;

use crate::error::{DataAccessError, ErrorCategory, RepositoryError};

/// Maps a native repository failure onto its stable category.
///
/// The mapping is total and depends only on the variant, never on the message.
pub fn category_of(error: &RepositoryError) -> ErrorCategory {
    translate(error.clone()).category()
}

/// Converts a native repository failure into a [`DataAccessError`].
pub fn translate(error: RepositoryError) -> DataAccessError {
    use RepositoryError::*;

    match error {
        AccessDenied(_) => DataAccessError::PermissionDenied(error),
        ConstraintViolation(_)
        | ItemExists(_)
        | ReferentialIntegrity(_)
        | VersionConflict(_)
        | MergeConflict(_) => DataAccessError::IntegrityViolation(error),
        InvalidItemState(_) | LockConflict(_) => DataAccessError::ConcurrencyConflict(error),
        InvalidQuery(_) | InvalidSerializedData(_) | ItemNotFound(_) | PathNotFound(_) => {
            DataAccessError::RetrievalFailure(error)
        }
        Namespace(_) | UnsupportedOperation(_) | ValueFormat(_) | NoSuchNodeType(_) => {
            DataAccessError::InvalidUsage(error)
        }
        NoSuchWorkspace(_) | Login(_) => {
            DataAccessError::resource_unavailable("repository resource unavailable", error)
        }
        Other(_) => DataAccessError::SystemFailure(error),
    }
}

impl From<RepositoryError> for DataAccessError {
    fn from(error: RepositoryError) -> Self {
        translate(error)
    }
}

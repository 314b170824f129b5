use async_trait::async_trait;

use crate::DataAccessResult;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Components implementing this trait can be registered on a
/// [`SessionHolder`](crate::SessionHolder) or a
/// [`TransactionStatus`](crate::TransactionStatus) to receive callbacks once the
/// transaction owning the session completes. Participants of a nested
/// transaction never trigger these callbacks; only the owner does.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after the owning transaction committed.
    ///
    /// Implementations should use this to finalize any pending operations,
    /// such as updating caches.
    async fn on_commit(&self) -> DataAccessResult<()>;

    /// Called after the owning transaction rolled back.
    ///
    /// Implementations should use this to revert in-memory state changes
    /// made during the transaction.
    async fn on_rollback(&self) -> DataAccessResult<()>;
}

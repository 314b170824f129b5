//! Local transactions over a single repository session.
//!
//! [`LocalTransactionManager`] binds one session per transaction. When the
//! session exposes a two-phase-commit resource the manager drives it directly
//! (start, prepare, commit or rollback, end); otherwise committing means
//! saving the session. A transaction begun while a session is already bound
//! participates in it: it never commits or rolls back on its own and instead
//! marks the holder rollback-only, leaving the decision to the owner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::binding::{BindingKey, ResourceRegistry};
use crate::error::{DataAccessError, DataAccessResult};
use crate::factory::SessionFactory;
use crate::holder::{SessionHolder, SessionKind};
use crate::session::{Vote, XaFlags, XaResource, Xid};
use crate::session_utils::{self, unbind_if_bound};
use crate::TransactionAware;

/// Transaction isolation level.
///
/// Repository sessions cannot negotiate isolation; only `Default` is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Requested transaction semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub isolation: Isolation,
    /// Plain sessions are not saved when a read-only transaction commits.
    pub read_only: bool,
    /// Shown in log output.
    pub name: Option<String>,
}

impl TransactionDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Lifecycle state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NoTransaction,
    Active,
    Committing,
    RollingBack,
}

#[derive(Debug)]
struct StatusState {
    state: TransactionState,
    rollback_only: bool,
}

struct StatusInner {
    key: BindingKey,
    holder: Arc<SessionHolder>,
    new_holder: bool,
    previous_nested: bool,
    xid: Option<Xid>,
    name: Option<String>,
    read_only: bool,
    state: Mutex<StatusState>,
}

/// Handle on a running transaction, passed to transactional code.
///
/// Clones refer to the same transaction.
#[derive(Clone)]
pub struct TransactionStatus {
    inner: Arc<StatusInner>,
}

impl TransactionStatus {
    fn new(
        key: BindingKey,
        holder: Arc<SessionHolder>,
        new_holder: bool,
        previous_nested: bool,
        xid: Option<Xid>,
        definition: &TransactionDefinition,
    ) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                key,
                holder,
                new_holder,
                previous_nested,
                xid,
                name: definition.name.clone(),
                read_only: definition.read_only,
                state: Mutex::new(StatusState {
                    state: TransactionState::Active,
                    rollback_only: false,
                }),
            }),
        }
    }

    /// Whether this transaction owns its session holder.
    pub fn is_new_transaction(&self) -> bool {
        self.inner.new_holder
    }

    /// Whether this transaction participates in a pre-bound holder.
    pub fn is_nested(&self) -> bool {
        !self.inner.new_holder
    }

    pub fn holder(&self) -> &Arc<SessionHolder> {
        &self.inner.holder
    }

    /// Key the holder is bound under.
    pub fn binding_key(&self) -> BindingKey {
        self.inner.key
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.inner.xid.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state.lock().state
    }

    pub fn is_completed(&self) -> bool {
        self.state() == TransactionState::NoTransaction
    }

    /// Requests a rollback of this transaction without raising an error.
    pub fn set_rollback_only(&self) {
        self.inner.state.lock().rollback_only = true;
    }

    pub fn is_local_rollback_only(&self) -> bool {
        self.inner.state.lock().rollback_only
    }

    /// Rollback-only, either locally or by any participant of the holder.
    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.inner.holder.is_rollback_only()
    }

    /// Registers a component notified when the owning transaction completes.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.inner.holder.register_transaction_aware(observer);
    }

    fn start_completion(&self, next: TransactionState) -> DataAccessResult<()> {
        let mut state = self.inner.state.lock();
        match state.state {
            TransactionState::Active => {
                state.state = next;
                Ok(())
            }
            TransactionState::NoTransaction => Err(DataAccessError::illegal_state(
                "transaction is already completed; do not call commit or rollback more than once per transaction",
            )),
            TransactionState::Committing | TransactionState::RollingBack => Err(
                DataAccessError::illegal_state("transaction completion is already in progress"),
            ),
        }
    }

    fn set_state(&self, next: TransactionState) {
        self.inner.state.lock().state = next;
    }
}

impl fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("name", &self.inner.name)
            .field("new_transaction", &self.inner.new_holder)
            .field("xid", &self.inner.xid)
            .field("state", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

/// Begins, commits and rolls back transactions.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, definition: &TransactionDefinition) -> DataAccessResult<TransactionStatus>;

    /// Commits, or rolls back if the transaction was marked rollback-only.
    async fn commit(&self, status: &TransactionStatus) -> DataAccessResult<()>;

    async fn rollback(&self, status: &TransactionStatus) -> DataAccessResult<()>;
}

/// [`TransactionManager`] for a single repository [`SessionFactory`].
#[derive(Clone)]
pub struct LocalTransactionManager {
    factory: Arc<dyn SessionFactory>,
}

impl LocalTransactionManager {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    pub fn builder() -> LocalTransactionManagerBuilder {
        LocalTransactionManagerBuilder::default()
    }

    pub fn session_factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    async fn do_commit(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        let holder = status.holder();
        match holder.kind() {
            SessionKind::Transactional { resource } => {
                let xid = status
                    .xid()
                    .ok_or_else(|| DataAccessError::illegal_state("no XA transaction was started"))?;

                let vote = match resource.prepare(xid).await {
                    Ok(vote) => vote,
                    Err(e) => {
                        abort(resource.as_ref(), xid).await;
                        return Err(DataAccessError::transaction_system("XA prepare failed", e));
                    }
                };
                if vote == Vote::Ok {
                    resource
                        .commit(xid, false)
                        .await
                        .map_err(|e| DataAccessError::transaction_system("XA commit failed", e))?;
                } else {
                    tracing::debug!(%xid, "read-only transaction; nothing to commit");
                }
                resource
                    .end(xid, XaFlags::Success)
                    .await
                    .map_err(|e| DataAccessError::transaction_system("XA end failed", e))
            }
            SessionKind::Plain if status.is_read_only() => {
                tracing::debug!("read-only transaction; not saving session");
                Ok(())
            }
            SessionKind::Plain => {
                holder.session().save().await?;
                Ok(())
            }
        }
    }

    async fn do_rollback(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        match status.holder().kind() {
            SessionKind::Transactional { resource } => {
                let xid = status
                    .xid()
                    .ok_or_else(|| DataAccessError::illegal_state("no XA transaction was started"))?;
                let ended = resource.end(xid, XaFlags::Fail).await;
                let rolled_back = resource.rollback(xid).await;
                ended.map_err(|e| DataAccessError::transaction_system("XA end failed", e))?;
                rolled_back.map_err(|e| DataAccessError::transaction_system("XA rollback failed", e))
            }
            SessionKind::Plain => {
                tracing::debug!("session has no rollback support; discarding it without saving");
                Ok(())
            }
        }
    }

    /// Rolls back an owned transaction, or marks a participated one rollback-only.
    async fn process_rollback(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        status.set_state(TransactionState::RollingBack);

        if status.is_nested() {
            tracing::debug!("participating transaction failed; marking session holder rollback-only");
            let marked = status.holder().set_rollback_only();
            let cleaned = self.cleanup(status).await;
            return marked.and(cleaned);
        }

        tracing::debug!(name = ?status.name(), "rolling back repository transaction");
        let rolled_back = self.do_rollback(status).await;
        let notified = notify(status.holder(), false).await;
        let cleaned = self.cleanup(status).await;
        rolled_back.and(notified).and(cleaned)
    }

    async fn cleanup(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        let holder = status.holder();
        let result = if status.is_new_transaction() {
            holder.clear();
            self.unbind_owned(holder).await
        } else {
            holder.set_nested_transaction_active(status.inner.previous_nested);
            Ok(())
        };
        status.set_state(TransactionState::NoTransaction);
        result
    }

    async fn unbind_owned(&self, holder: &Arc<SessionHolder>) -> DataAccessResult<()> {
        let key = self.factory.binding_key();
        let bound = ResourceRegistry::unbind(key)?;
        if !Arc::ptr_eq(&bound, holder) {
            ResourceRegistry::bind(key, bound)?;
            return Err(DataAccessError::illegal_state(
                "a different session holder is bound than the one this transaction opened",
            ));
        }
        session_utils::release_holder(holder, &*self.factory).await
    }
}

#[async_trait]
impl TransactionManager for LocalTransactionManager {
    async fn begin(&self, definition: &TransactionDefinition) -> DataAccessResult<TransactionStatus> {
        if definition.isolation != Isolation::Default {
            return Err(DataAccessError::configuration(format!(
                "repository sessions do not support isolation level {:?}",
                definition.isolation
            )));
        }

        if let Some(holder) = ResourceRegistry::lookup(self.factory.binding_key()) {
            if holder.is_released() {
                return Err(DataAccessError::illegal_state(
                    "bound session holder has already been released",
                ));
            }
            let previous = holder.set_nested_transaction_active(true);
            tracing::debug!(name = ?definition.name, "participating in bound session");
            return Ok(TransactionStatus::new(
                self.factory.binding_key(),
                holder,
                false,
                previous,
                None,
                definition,
            ));
        }

        let holder = session_utils::open_and_bind(&*self.factory).await?;
        let xid = match holder.xa_resource() {
            Some(resource) => {
                let xid = Xid::new();
                if let Err(e) = resource.start(&xid, XaFlags::NoFlags).await {
                    if let Err(cleanup_error) = self.unbind_owned(&holder).await {
                        tracing::error!(error = %cleanup_error, "could not release session after failed XA start");
                    }
                    return Err(DataAccessError::transaction_system("XA start failed", e));
                }
                holder.set_transaction(Some(xid.clone()));
                Some(xid)
            }
            None => None,
        };

        tracing::debug!(name = ?definition.name, xid = ?xid, "began repository transaction");
        Ok(TransactionStatus::new(
            self.factory.binding_key(),
            holder,
            true,
            false,
            xid,
            definition,
        ))
    }

    async fn commit(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        status.start_completion(TransactionState::Committing)?;

        if status.is_local_rollback_only() {
            tracing::debug!("transactional code requested rollback");
            return self.process_rollback(status).await;
        }

        if status.holder().is_rollback_only() {
            tracing::debug!("session holder is marked rollback-only; rolling back");
            self.process_rollback(status).await?;
            return Err(DataAccessError::UnexpectedRollback(
                "a participant of this transaction marked it rollback-only".to_string(),
            ));
        }

        if status.is_nested() {
            return self.cleanup(status).await;
        }

        tracing::debug!(name = ?status.name(), "committing repository transaction");
        let committed = self.do_commit(status).await;
        let notified = match &committed {
            Ok(()) => notify(status.holder(), true).await,
            Err(_) => notify(status.holder(), false).await,
        };
        let cleaned = self.cleanup(status).await;
        committed.and(notified).and(cleaned)
    }

    async fn rollback(&self, status: &TransactionStatus) -> DataAccessResult<()> {
        status.start_completion(TransactionState::RollingBack)?;
        self.process_rollback(status).await
    }
}

/// Best-effort rollback after a failed prepare.
async fn abort(resource: &dyn XaResource, xid: &Xid) {
    if let Err(e) = resource.end(xid, XaFlags::Fail).await {
        tracing::warn!(error = %e, %xid, "XA end after failed prepare failed");
    }
    if let Err(e) = resource.rollback(xid).await {
        tracing::warn!(error = %e, %xid, "XA rollback after failed prepare failed");
    }
}

/// Notify all registered observers of the outcome.
async fn notify(holder: &SessionHolder, committed: bool) -> DataAccessResult<()> {
    let observers = holder.take_observers();
    for observer in observers.iter() {
        if committed {
            observer.on_commit().await?;
        } else {
            observer.on_rollback().await?;
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct LocalTransactionManagerBuilder {
    factory: Option<Arc<dyn SessionFactory>>,
}

impl LocalTransactionManagerBuilder {
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> DataAccessResult<LocalTransactionManager> {
        let factory = self
            .factory
            .ok_or_else(|| DataAccessError::configuration("session factory is required"))?;
        Ok(LocalTransactionManager::new(factory))
    }
}

/// Runs closures inside a transaction of a [`TransactionManager`].
#[derive(Clone)]
pub struct TransactionTemplate {
    manager: Arc<dyn TransactionManager>,
    definition: TransactionDefinition,
}

impl TransactionTemplate {
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            manager,
            definition: TransactionDefinition::default(),
        }
    }

    pub fn with_definition(mut self, definition: TransactionDefinition) -> Self {
        self.definition = definition;
        self
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    /// Commits when `action` succeeds and rolls back when it fails.
    ///
    /// The action's own error is returned after the rollback; a failing
    /// rollback is logged and never replaces it. Dropping the returned future
    /// before `action` finishes rolls the transaction back.
    pub async fn execute<T, E, F, Fut>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce(TransactionStatus) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataAccessError>,
    {
        let status = self.manager.begin(&self.definition).await?;
        let guard = CompletionGuard {
            manager: self.manager.clone(),
            status: Some(status.clone()),
        };
        let outcome = action(status.clone()).await;
        guard.disarm();
        match outcome {
            Ok(value) => {
                self.manager.commit(&status).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.manager.rollback(&status).await {
                    tracing::error!(error = %rollback_error, "rollback after failed transactional code failed");
                }
                Err(e)
            }
        }
    }
}

/// Rolls back a transaction whose template call was abandoned mid-action.
struct CompletionGuard {
    manager: Arc<dyn TransactionManager>,
    status: Option<TransactionStatus>,
}

impl CompletionGuard {
    fn disarm(mut self) {
        self.status = None;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let status = match self.status.take() {
            Some(status) if !status.is_completed() => status,
            _ => return,
        };

        if status.is_nested() {
            tracing::warn!(name = ?status.name(), "participating transaction abandoned; marking session holder rollback-only");
            if let Err(e) = status.holder().set_rollback_only() {
                tracing::warn!(error = %e, "could not mark abandoned transaction rollback-only");
            }
            status
                .holder()
                .set_nested_transaction_active(status.inner.previous_nested);
            status.set_state(TransactionState::NoTransaction);
            return;
        }

        tracing::warn!(name = ?status.name(), "transaction abandoned; rolling back");
        let key = status.binding_key();
        unbind_if_bound(key, status.holder());
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::error!(%key, "no runtime available; abandoned transaction left open");
                return;
            }
        };

        // The rollback unbinds the holder it owns, so it runs in a context of
        // its own with the holder bound again.
        let manager = self.manager.clone();
        runtime.spawn(ResourceRegistry::scope(async move {
            if let Err(e) = ResourceRegistry::bind(key, status.holder().clone()) {
                tracing::error!(error = %e, %key, "could not rebind abandoned transaction");
                return;
            }
            if let Err(e) = manager.rollback(&status).await {
                tracing::error!(error = %e, "rollback of abandoned transaction failed");
            }
        }));
    }
}

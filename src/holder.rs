use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

use crate::error::{DataAccessError, DataAccessResult};
use crate::session::{Session, XaResource, Xid};
use crate::TransactionAware;

/// Transactional capability of a held session, decided once when the holder is built.
#[derive(Clone)]
pub enum SessionKind {
    /// No two-phase-commit support; changes are persisted with `save`.
    Plain,
    /// The session exposes a two-phase-commit resource.
    Transactional { resource: Arc<dyn XaResource> },
}

impl fmt::Debug for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::Transactional { .. } => f.write_str("Transactional"),
        }
    }
}

#[derive(Debug, Default)]
struct HolderState {
    rollback_only: bool,
    nested_transaction_active: bool,
    transaction: Option<Xid>,
    released: bool,
}

/// Holds the one live session of a unit of work.
///
/// A holder is shared (`Arc`) between the resource registry and whoever
/// opened the unit of work; the state behind it is guarded so that nested
/// participants can flag it as rollback-only.
pub struct SessionHolder {
    session: Arc<dyn Session>,
    kind: SessionKind,
    state: Mutex<HolderState>,
    observers: RwLock<Vec<Arc<dyn TransactionAware>>>,
}

impl SessionHolder {
    /// Creates a holder without transactional capability.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self::with_kind(session, SessionKind::Plain)
    }

    /// Creates a holder driving the given two-phase-commit resource.
    pub fn transactional(session: Arc<dyn Session>, resource: Arc<dyn XaResource>) -> Self {
        Self::with_kind(session, SessionKind::Transactional { resource })
    }

    pub fn with_kind(session: Arc<dyn Session>, kind: SessionKind) -> Self {
        Self {
            session,
            kind,
            state: Mutex::new(HolderState::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn kind(&self) -> &SessionKind {
        &self.kind
    }

    pub fn xa_resource(&self) -> Option<&Arc<dyn XaResource>> {
        match &self.kind {
            SessionKind::Transactional { resource } => Some(resource),
            SessionKind::Plain => None,
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self.kind, SessionKind::Transactional { .. })
    }

    /// Whether `session` is the very session held here.
    pub fn holds(&self, session: &Arc<dyn Session>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.session), Arc::as_ptr(session))
    }

    /// Marks the unit of work so that it can only roll back.
    ///
    /// Fails once the session has been released: nobody could act on the flag.
    pub fn set_rollback_only(&self) -> DataAccessResult<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(DataAccessError::illegal_state(
                "cannot mark a released session holder as rollback-only",
            ));
        }
        state.rollback_only = true;
        Ok(())
    }

    pub fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }

    pub fn is_nested_transaction_active(&self) -> bool {
        self.state.lock().nested_transaction_active
    }

    /// Sets the nested flag and returns its previous value.
    pub(crate) fn set_nested_transaction_active(&self, active: bool) -> bool {
        std::mem::replace(&mut self.state.lock().nested_transaction_active, active)
    }

    /// Id of the transaction currently running on the held resource.
    pub fn transaction(&self) -> Option<Xid> {
        self.state.lock().transaction.clone()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    pub(crate) fn set_transaction(&self, xid: Option<Xid>) {
        self.state.lock().transaction = xid;
    }

    /// Register a component that needs to be notified of transaction events.
    pub fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    pub(crate) fn take_observers(&self) -> Vec<Arc<dyn TransactionAware>> {
        std::mem::take(&mut *self.observers.write())
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Records that the held session is being given back.
    ///
    /// A second call is a broken nesting invariant and fails.
    pub(crate) fn mark_released(&self) -> DataAccessResult<()> {
        let mut state = self.state.lock();
        if state.released {
            return Err(DataAccessError::illegal_state(
                "session holder has already been released",
            ));
        }
        state.released = true;
        Ok(())
    }

    /// Resets transaction-local state after the owning transaction completed.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.rollback_only = false;
        state.nested_transaction_active = false;
        state.transaction = None;
    }
}

impl fmt::Debug for SessionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHolder")
            .field("kind", &self.kind)
            .field("state", &*self.state.lock())
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

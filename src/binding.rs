//! Context-bound registry of session holders.
//!
//! Bindings live in a task-local slot established by [`ResourceRegistry::scope`]
//! (or [`ResourceRegistry::sync_scope`]). Every scope owns its own map, so
//! concurrent units of work never see each other's holders, and a scope entered
//! inside another one starts out empty.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{DataAccessError, DataAccessResult};
use crate::holder::SessionHolder;

/// Identity of a session factory, used to look up its bound holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey(Uuid);

impl BindingKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BindingKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Bindings = RefCell<HashMap<BindingKey, Arc<SessionHolder>>>;

tokio::task_local! {
    static RESOURCES: Bindings;
}

/// Access to the holders bound in the current execution context.
pub struct ResourceRegistry;

impl ResourceRegistry {
    /// Runs `future` inside a fresh binding context.
    pub async fn scope<F: Future>(future: F) -> F::Output {
        RESOURCES.scope(RefCell::new(HashMap::new()), future).await
    }

    /// Runs `f` inside a fresh binding context.
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        RESOURCES.sync_scope(RefCell::new(HashMap::new()), f)
    }

    /// Whether the caller runs inside a binding context.
    pub fn is_active() -> bool {
        RESOURCES.try_with(|_| ()).is_ok()
    }

    pub fn lookup(key: BindingKey) -> Option<Arc<SessionHolder>> {
        RESOURCES
            .try_with(|bindings| bindings.borrow().get(&key).cloned())
            .ok()
            .flatten()
    }

    pub fn has_resource(key: BindingKey) -> bool {
        Self::lookup(key).is_some()
    }

    /// Binds `holder` under `key`.
    ///
    /// Binding twice for the same key, or outside any binding context, is a
    /// programming error.
    pub fn bind(key: BindingKey, holder: Arc<SessionHolder>) -> DataAccessResult<()> {
        RESOURCES
            .try_with(|bindings| {
                let mut bindings = bindings.borrow_mut();
                if bindings.contains_key(&key) {
                    return Err(DataAccessError::illegal_state(format!(
                        "already a session holder bound for key [{key}]"
                    )));
                }
                bindings.insert(key, holder);
                tracing::trace!(%key, "bound session holder");
                Ok(())
            })
            .map_err(|_| no_context())?
    }

    /// Removes and returns the holder bound under `key`.
    pub fn unbind(key: BindingKey) -> DataAccessResult<Arc<SessionHolder>> {
        RESOURCES
            .try_with(|bindings| {
                let holder = bindings.borrow_mut().remove(&key).ok_or_else(|| {
                    DataAccessError::illegal_state(format!(
                        "no session holder bound for key [{key}]"
                    ))
                })?;
                tracing::trace!(%key, "unbound session holder");
                Ok(holder)
            })
            .map_err(|_| no_context())?
    }
}

fn no_context() -> DataAccessError {
    DataAccessError::illegal_state(
        "no resource binding context is active; run the unit of work inside ResourceRegistry::scope",
    )
}

//! Helpers for getting hold of a session that honour the current binding.

use std::sync::Arc;

use crate::binding::{BindingKey, ResourceRegistry};
use crate::error::{DataAccessError, DataAccessResult};
use crate::factory::SessionFactory;
use crate::holder::SessionHolder;
use crate::session::Session;

/// Returns the session bound for `factory`, or opens a new one.
///
/// When nothing is bound and `allow_create` is false this is a configuration
/// error: the caller expected to run inside a unit of work.
pub async fn get_session(
    factory: &dyn SessionFactory,
    allow_create: bool,
) -> DataAccessResult<Arc<dyn Session>> {
    if let Some(holder) = ResourceRegistry::lookup(factory.binding_key()) {
        return Ok(holder.session().clone());
    }
    if !allow_create {
        return Err(DataAccessError::configuration(
            "no session bound to the current context, and configuration does not allow creation of a non-transactional one here",
        ));
    }
    tracing::debug!("opening repository session");
    factory.get_session().await
}

/// Closes `session` unless it belongs to the holder bound for `factory`.
pub async fn release_session(session: &Arc<dyn Session>, factory: &dyn SessionFactory) {
    if let Some(holder) = ResourceRegistry::lookup(factory.binding_key()) {
        if holder.holds(session) {
            tracing::trace!("session is bound to the current context; not closing it");
            return;
        }
    }
    tracing::debug!("closing repository session");
    factory.release_session(session).await;
}

/// Opens a session and binds its holder for `factory`.
pub(crate) async fn open_and_bind(factory: &dyn SessionFactory) -> DataAccessResult<Arc<SessionHolder>> {
    let session = factory.get_session().await?;
    let holder = Arc::new(factory.get_session_holder(session));
    if let Err(e) = ResourceRegistry::bind(factory.binding_key(), holder.clone()) {
        factory.release_session(holder.session()).await;
        return Err(e);
    }
    tracing::debug!(key = %factory.binding_key(), "bound new session holder");
    Ok(holder)
}

/// Unbinds the holder bound for `factory` and closes its session.
///
/// Only the caller that bound the holder may call this.
pub(crate) async fn unbind_and_release(factory: &dyn SessionFactory) -> DataAccessResult<()> {
    let holder = ResourceRegistry::unbind(factory.binding_key())?;
    release_holder(&holder, factory).await
}

/// Closes the session of a holder that is no longer bound.
pub(crate) async fn release_holder(
    holder: &SessionHolder,
    factory: &dyn SessionFactory,
) -> DataAccessResult<()> {
    holder.mark_released()?;
    tracing::debug!(key = %factory.binding_key(), "closing bound repository session");
    factory.release_session(holder.session()).await;
    Ok(())
}

/// Unbinds and releases a freshly bound holder unless disarmed.
///
/// Covers the call future being dropped, or unwinding, before the normal
/// release path runs. Logging out is asynchronous, so it is spawned onto the
/// current runtime.
pub(crate) struct BindingGuard {
    factory: Arc<dyn SessionFactory>,
    holder: Option<Arc<SessionHolder>>,
}

impl BindingGuard {
    pub(crate) fn new(factory: Arc<dyn SessionFactory>, holder: Arc<SessionHolder>) -> Self {
        Self {
            factory,
            holder: Some(holder),
        }
    }

    /// The normal path took over; dropping no longer releases anything.
    pub(crate) fn disarm(mut self) {
        self.holder = None;
    }
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        let holder = match self.holder.take() {
            Some(holder) => holder,
            None => return,
        };
        let key = self.factory.binding_key();
        tracing::warn!(%key, "unit of work abandoned; releasing its session");

        unbind_if_bound(key, &holder);
        if holder.mark_released().is_err() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let factory = self.factory.clone();
                runtime.spawn(async move {
                    factory.release_session(holder.session()).await;
                });
            }
            Err(_) => tracing::error!(%key, "no runtime available; abandoned session left open"),
        }
    }
}

/// Removes `holder` from the registry if it is the one bound under `key`.
pub(crate) fn unbind_if_bound(key: BindingKey, holder: &Arc<SessionHolder>) {
    let ours = ResourceRegistry::lookup(key).map_or(false, |bound| Arc::ptr_eq(&bound, holder));
    if ours {
        if let Err(e) = ResourceRegistry::unbind(key) {
            tracing::warn!(error = %e, %key, "could not unbind abandoned session holder");
        }
    }
}

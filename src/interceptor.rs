use std::future::Future;
use std::sync::Arc;

use crate::binding::ResourceRegistry;
use crate::error::DataAccessError;
use crate::factory::SessionFactory;
use crate::session_utils::{self, BindingGuard};

/// Makes sure a session is bound for the duration of an intercepted call.
///
/// Calls made while a session is already bound simply participate. Otherwise
/// the interceptor opens and binds a session before the call and unbinds and
/// releases it afterwards, whatever the call's outcome. A call that is dropped
/// before finishing still has its session unbound and released.
#[derive(Clone)]
pub struct SessionInterceptor {
    factory: Arc<dyn SessionFactory>,
}

impl SessionInterceptor {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    pub fn session_factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    pub async fn invoke<T, E, F, Fut>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataAccessError>,
    {
        let key = self.factory.binding_key();
        if ResourceRegistry::has_resource(key) {
            tracing::trace!(%key, "found bound session; participating");
            return call().await;
        }

        let holder = session_utils::open_and_bind(&*self.factory).await?;
        let guard = BindingGuard::new(self.factory.clone(), holder);
        let result = call().await;
        guard.disarm();
        let released = session_utils::unbind_and_release(&*self.factory).await;

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                tracing::error!(error = %release_error, "could not release session after failed call");
                Err(e)
            }
        }
    }
}

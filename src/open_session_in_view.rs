//! "Open session in view": one session per request.
//!
//! The interceptor binds a session when request processing starts and releases
//! it when the request completes, so that everything running for the request
//! (including rendering after the business transaction finished) shares it.
//! Re-entering for a request that already has a session only bumps a
//! participate counter kept in the request attributes.
//!
//! `pre_handle` and `after_completion` of one request must run inside the same
//! [`ResourceRegistry::scope`](crate::ResourceRegistry::scope).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::binding::ResourceRegistry;
use crate::error::{DataAccessError, DataAccessResult};
use crate::factory::SessionFactory;
use crate::holder::SessionHolder;
use crate::session_utils::{self, BindingGuard};

/// Appended to the factory key to form the participate counter attribute name.
pub const PARTICIPATE_SUFFIX: &str = ".PARTICIPATE";

/// Per-request attribute store shared by everything handling one request.
///
/// Cloning yields another handle to the same attributes.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    inner: Arc<Mutex<HashMap<String, usize>>>,
}

impl RequestAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.inner.lock().get(name).copied()
    }

    pub fn set(&self, name: impl Into<String>, value: usize) {
        self.inner.lock().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<usize> {
        self.inner.lock().remove(name)
    }
}

#[derive(Clone)]
pub struct OpenSessionInViewInterceptor {
    factory: Arc<dyn SessionFactory>,
}

impl OpenSessionInViewInterceptor {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self { factory }
    }

    pub fn session_factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// Name of the request attribute counting participating entries.
    pub fn participate_attribute_name(&self) -> String {
        format!("{}{}", self.factory.binding_key(), PARTICIPATE_SUFFIX)
    }

    /// Binds a session for the request, or participates in the bound one.
    pub async fn pre_handle(&self, request: &RequestAttributes) -> DataAccessResult<()> {
        self.enter(request).await.map(|_| ())
    }

    /// Returns the holder when this entry bound a new one.
    async fn enter(&self, request: &RequestAttributes) -> DataAccessResult<Option<Arc<SessionHolder>>> {
        if ResourceRegistry::has_resource(self.factory.binding_key()) {
            let name = self.participate_attribute_name();
            let count = request.get(&name).map_or(1, |count| count + 1);
            tracing::trace!(count, "session already bound; participating");
            request.set(name, count);
            return Ok(None);
        }

        tracing::debug!("opening repository session in view");
        let holder = session_utils::open_and_bind(&*self.factory).await?;
        Ok(Some(holder))
    }

    /// Leaves the request: drops one participation, or releases the session.
    pub async fn after_completion(&self, request: &RequestAttributes) -> DataAccessResult<()> {
        let name = self.participate_attribute_name();
        match request.get(&name) {
            Some(count) if count > 1 => request.set(name, count - 1),
            Some(_) => {
                request.remove(&name);
            }
            None => {
                tracing::debug!("closing repository session in view");
                session_utils::unbind_and_release(&*self.factory).await?;
            }
        }
        Ok(())
    }

    /// Runs `chain` between [`pre_handle`](Self::pre_handle) and
    /// [`after_completion`](Self::after_completion), like a request filter.
    ///
    /// If the filter future is dropped before the chain finishes, a session
    /// bound by this entry is still unbound and released.
    pub async fn do_filter<T, E, F, Fut>(&self, request: &RequestAttributes, chain: F) -> Result<T, E>
    where
        F: FnOnce(RequestAttributes) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataAccessError>,
    {
        let guard = self
            .enter(request)
            .await?
            .map(|holder| BindingGuard::new(self.factory.clone(), holder));
        let result = chain(request.clone()).await;
        if let Some(guard) = guard {
            guard.disarm();
        }
        let completed = self.after_completion(request).await;

        match (result, completed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(completion_error)) => {
                tracing::error!(error = %completion_error, "could not complete request after failed chain");
                Err(e)
            }
        }
    }
}

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::{DataAccessError, DataAccessResult, RepositoryResult};
use crate::factory::SessionFactory;
use crate::session::{LockManager, NamespaceRegistry, ObservationManager, Session, XaResource};
use crate::session_utils;

/// How a [`SessionTemplate`] obtains and exposes sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Open a new session when none is bound to the current context.
    pub allow_create: bool,
    /// Hand the raw session to callbacks instead of a close-suppressing wrapper.
    pub expose_native_session: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            allow_create: true,
            expose_native_session: false,
        }
    }
}

/// Runs callbacks against a repository session.
///
/// The bound session of the current unit of work is reused when there is one;
/// otherwise a session is opened for the call and closed afterwards. Native
/// repository failures leave the template as [`DataAccessError`]s.
#[derive(Clone)]
pub struct SessionTemplate {
    factory: Arc<dyn SessionFactory>,
    settings: TemplateSettings,
}

impl SessionTemplate {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_settings(factory, TemplateSettings::default())
    }

    pub fn with_settings(factory: Arc<dyn SessionFactory>, settings: TemplateSettings) -> Self {
        Self { factory, settings }
    }

    pub fn session_factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    pub fn settings(&self) -> TemplateSettings {
        self.settings
    }

    pub async fn execute<T, F, Fut>(&self, action: F) -> DataAccessResult<T>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.execute_with(action, self.settings.expose_native_session)
            .await
    }

    pub async fn execute_with<T, F, Fut>(&self, action: F, expose_native: bool) -> DataAccessResult<T>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        let session = session_utils::get_session(&*self.factory, self.settings.allow_create).await?;
        let exposed: Arc<dyn Session> = if expose_native {
            session.clone()
        } else {
            Arc::new(CloseSuppressingSession::new(session.clone()))
        };

        let result = action(exposed).await;
        session_utils::release_session(&session, &*self.factory).await;
        result.map_err(DataAccessError::from)
    }

    pub async fn save(&self) -> DataAccessResult<()> {
        self.execute(|session| async move { session.save().await })
            .await
    }

    pub async fn refresh(&self, keep_changes: bool) -> DataAccessResult<()> {
        self.execute(move |session| async move { session.refresh(keep_changes).await })
            .await
    }

    pub async fn has_pending_changes(&self) -> DataAccessResult<bool> {
        self.execute(|session| async move { session.has_pending_changes().await })
            .await
    }

    pub async fn item_exists(&self, path: &str) -> DataAccessResult<bool> {
        let path = path.to_owned();
        self.execute(move |session| async move { session.item_exists(&path).await })
            .await
    }

    pub async fn remove_item(&self, path: &str) -> DataAccessResult<()> {
        let path = path.to_owned();
        self.execute(move |session| async move { session.remove_item(&path).await })
            .await
    }

    pub async fn add_lock_token(&self, token: &str) -> DataAccessResult<()> {
        let token = token.to_owned();
        self.execute(move |session| async move {
            session.lock_manager()?.add_lock_token(&token).await
        })
        .await
    }

    pub async fn remove_lock_token(&self, token: &str) -> DataAccessResult<()> {
        let token = token.to_owned();
        self.execute(move |session| async move {
            session.lock_manager()?.remove_lock_token(&token).await
        })
        .await
    }

    pub async fn lock_tokens(&self) -> DataAccessResult<Vec<String>> {
        self.execute(|session| async move { session.lock_manager()?.lock_tokens().await })
            .await
    }
}

/// Session handed to callbacks that must not close it themselves.
struct CloseSuppressingSession {
    inner: Arc<dyn Session>,
}

impl CloseSuppressingSession {
    fn new(inner: Arc<dyn Session>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Session for CloseSuppressingSession {
    fn repository_name(&self) -> Option<String> {
        self.inner.repository_name()
    }

    fn user_id(&self) -> Option<String> {
        self.inner.user_id()
    }

    fn workspace_name(&self) -> Option<String> {
        self.inner.workspace_name()
    }

    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    async fn save(&self) -> RepositoryResult<()> {
        self.inner.save().await
    }

    async fn refresh(&self, keep_changes: bool) -> RepositoryResult<()> {
        self.inner.refresh(keep_changes).await
    }

    async fn has_pending_changes(&self) -> RepositoryResult<bool> {
        self.inner.has_pending_changes().await
    }

    async fn item_exists(&self, path: &str) -> RepositoryResult<bool> {
        self.inner.item_exists(path).await
    }

    async fn remove_item(&self, path: &str) -> RepositoryResult<()> {
        self.inner.remove_item(path).await
    }

    async fn logout(&self) -> RepositoryResult<()> {
        // closed by whoever owns the session
        tracing::trace!("ignoring logout on a managed session");
        Ok(())
    }

    fn xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        self.inner.xa_resource()
    }

    fn lock_manager(&self) -> RepositoryResult<Arc<dyn LockManager>> {
        self.inner.lock_manager()
    }

    fn namespace_registry(&self) -> RepositoryResult<Arc<dyn NamespaceRegistry>> {
        self.inner.namespace_registry()
    }

    fn observation_manager(&self) -> RepositoryResult<Arc<dyn ObservationManager>> {
        self.inner.observation_manager()
    }
}

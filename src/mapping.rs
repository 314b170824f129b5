//! Object-to-content mapping on top of [`SessionTemplate`].
//!
//! The mapping library itself is external; this module only makes sure each
//! of its calls runs with a session of the current unit of work and that its
//! failures are translated.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::{DataAccessResult, RepositoryResult};
use crate::session::Session;
use crate::template::SessionTemplate;

/// A query for mapped objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Mapped type the results must have.
    pub type_name: String,
    /// Restrict results to this subtree.
    pub scope: Option<String>,
    pub filter: Option<String>,
}

impl Query {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Persists objects as repository content.
#[async_trait]
pub trait ObjectContentManager: Send + Sync {
    type Object: Send + Sync;

    async fn insert(&self, object: &Self::Object) -> RepositoryResult<()>;

    async fn update(&self, object: &Self::Object) -> RepositoryResult<()>;

    async fn remove(&self, path: &str) -> RepositoryResult<()>;

    async fn get_object(&self, path: &str) -> RepositoryResult<Option<Self::Object>>;

    async fn get_objects(&self, query: &Query) -> RepositoryResult<Vec<Self::Object>>;

    async fn object_exists(&self, path: &str) -> RepositoryResult<bool>;

    async fn save(&self) -> RepositoryResult<()>;
}

/// Creates an [`ObjectContentManager`] working on a given session.
pub trait ObjectContentManagerFactory: Send + Sync {
    type Manager: ObjectContentManager;

    fn create(&self, session: Arc<dyn Session>) -> Self::Manager;
}

type MappedObject<F> =
    <<F as ObjectContentManagerFactory>::Manager as ObjectContentManager>::Object;

pub struct MappingTemplate<F> {
    template: SessionTemplate,
    factory: F,
}

impl<F: ObjectContentManagerFactory> MappingTemplate<F> {
    pub fn new(template: SessionTemplate, factory: F) -> Self {
        Self { template, factory }
    }

    pub fn session_template(&self) -> &SessionTemplate {
        &self.template
    }

    pub fn manager_factory(&self) -> &F {
        &self.factory
    }

    /// Runs `action` with a manager bound to the current unit of work's session.
    pub async fn execute<T, A, Fut>(&self, action: A) -> DataAccessResult<T>
    where
        A: FnOnce(F::Manager) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.execute_with(action, self.template.settings().expose_native_session)
            .await
    }

    /// Like [`execute`](Self::execute), choosing whether the manager sees the
    /// native session or a close-suppressing wrapper.
    pub async fn execute_with<T, A, Fut>(&self, action: A, expose_native: bool) -> DataAccessResult<T>
    where
        A: FnOnce(F::Manager) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        self.template
            .execute_with(|session| action(self.factory.create(session)), expose_native)
            .await
    }

    // Delegates hand the manager the native session.

    pub async fn insert(&self, object: &MappedObject<F>) -> DataAccessResult<()> {
        self.execute_with(|manager| async move { manager.insert(object).await }, true)
            .await
    }

    pub async fn update(&self, object: &MappedObject<F>) -> DataAccessResult<()> {
        self.execute_with(|manager| async move { manager.update(object).await }, true)
            .await
    }

    pub async fn remove(&self, path: &str) -> DataAccessResult<()> {
        self.execute_with(|manager| async move { manager.remove(path).await }, true)
            .await
    }

    pub async fn get_object(&self, path: &str) -> DataAccessResult<Option<MappedObject<F>>> {
        self.execute_with(|manager| async move { manager.get_object(path).await }, true)
            .await
    }

    pub async fn get_objects(&self, query: &Query) -> DataAccessResult<Vec<MappedObject<F>>> {
        self.execute_with(|manager| async move { manager.get_objects(query).await }, true)
            .await
    }

    pub async fn object_exists(&self, path: &str) -> DataAccessResult<bool> {
        self.execute_with(|manager| async move { manager.object_exists(path).await }, true)
            .await
    }

    pub async fn save(&self) -> DataAccessResult<()> {
        self.execute_with(|manager| async move { manager.save().await }, true)
            .await
    }
}

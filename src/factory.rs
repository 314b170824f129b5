use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::binding::BindingKey;
use crate::error::{DataAccessError, DataAccessResult};
use crate::holder::SessionHolder;
use crate::provider::{ListProviderManager, ProviderManager, ProviderRef, XaSessionHolderProvider};
use crate::session::{Credentials, EventListenerDefinition, Repository, Session, REP_NAME_DESC};

/// Creates and releases repository sessions.
///
/// A factory is also the identity under which its sessions are bound in the
/// [`ResourceRegistry`](crate::ResourceRegistry).
#[async_trait]
pub trait SessionFactory: Send + Sync {
    fn binding_key(&self) -> BindingKey;

    /// Opens a new session. Failures are reported as `ResourceUnavailable`.
    async fn get_session(&self) -> DataAccessResult<Arc<dyn Session>>;

    /// Wraps `session` in the holder variant matching the repository.
    fn get_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder;

    /// Closes `session`. Errors are logged, not propagated.
    async fn release_session(&self, session: &Arc<dyn Session>);
}

/// Namespaces registered when the factory starts.
#[derive(Debug, Clone)]
pub struct NamespaceSettings {
    /// prefix -> URI
    pub mappings: BTreeMap<String, String>,
    /// Replace prefixes that already exist, restoring them on destroy.
    pub force_registration: bool,
    /// Leave prefixes that already exist alone.
    pub skip_existing: bool,
    /// Keep the registered namespaces when the factory is destroyed.
    pub keep_new: bool,
}

impl NamespaceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.mappings.insert(prefix.into(), uri.into());
        self
    }
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::new(),
            force_registration: false,
            skip_existing: true,
            keep_new: true,
        }
    }
}

#[derive(Debug, Default)]
struct NamespaceRegistration {
    registered: Vec<String>,
    overwritten: Vec<(String, String)>,
}

/// [`SessionFactory`] logging into a [`Repository`].
pub struct RepositorySessionFactory {
    key: BindingKey,
    repository: Arc<dyn Repository>,
    workspace_name: Option<String>,
    credentials: Option<Credentials>,
    namespaces: NamespaceSettings,
    event_listeners: Vec<EventListenerDefinition>,
    provider_manager: Arc<dyn ProviderManager>,
    holder_provider: OnceLock<ProviderRef>,
    registration: Mutex<NamespaceRegistration>,
}

impl RepositorySessionFactory {
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::default()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn workspace_name(&self) -> Option<&str> {
        self.workspace_name.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn namespaces(&self) -> &NamespaceSettings {
        &self.namespaces
    }

    pub fn event_listeners(&self) -> &[EventListenerDefinition] {
        &self.event_listeners
    }

    /// Selects the holder provider and registers the configured namespaces.
    pub async fn initialize(&self) -> DataAccessResult<()> {
        let repository_name = self.repository.descriptor(REP_NAME_DESC);
        let provider = self.provider_manager.session_provider(repository_name.as_deref());
        if self.holder_provider.set(provider).is_err() {
            tracing::debug!(factory = %self, "session holder provider already selected");
        }

        if !self.namespaces.mappings.is_empty() {
            self.register_namespaces().await?;
        }
        Ok(())
    }

    /// Undoes the namespace registration of [`initialize`](Self::initialize)
    /// unless the new namespaces should be kept.
    pub async fn destroy(&self) -> DataAccessResult<()> {
        let registration = std::mem::take(&mut *self.registration.lock());
        if self.namespaces.keep_new {
            tracing::debug!("keeping newly registered namespaces");
            return Ok(());
        }
        if registration.registered.is_empty() && registration.overwritten.is_empty() {
            return Ok(());
        }

        let session = self.login().await?;
        let result = self.unregister_namespaces(&session, &registration).await;
        self.release_session(&session).await;
        result
    }

    async fn login(&self) -> DataAccessResult<Arc<dyn Session>> {
        self.repository
            .login(self.credentials.as_ref(), self.workspace_name.as_deref())
            .await
            .map_err(|e| DataAccessError::resource_unavailable("could not open repository session", e))
    }

    async fn register_namespaces(&self) -> DataAccessResult<()> {
        let session = self.login().await?;
        let result = self.do_register_namespaces(&session).await;
        self.release_session(&session).await;
        result
    }

    async fn do_register_namespaces(&self, session: &Arc<dyn Session>) -> DataAccessResult<()> {
        let registry = session.namespace_registry()?;
        let existing: HashSet<String> = registry.prefixes().await?.into_iter().collect();

        let mut overwritten = Vec::new();
        if self.namespaces.force_registration {
            for prefix in self.namespaces.mappings.keys() {
                if existing.contains(prefix) {
                    let uri = registry.uri(prefix).await?;
                    registry.unregister_namespace(prefix).await?;
                    tracing::debug!(%prefix, %uri, "unregistered existing namespace");
                    overwritten.push((prefix.clone(), uri));
                }
            }
        }

        let mut registered = Vec::new();
        for (prefix, uri) in &self.namespaces.mappings {
            let forced = overwritten.iter().any(|(p, _)| p == prefix);
            if self.namespaces.skip_existing && existing.contains(prefix) && !forced {
                tracing::debug!(%prefix, "namespace already registered; skipping");
                continue;
            }
            registry.register_namespace(prefix, uri).await?;
            tracing::debug!(%prefix, %uri, "registered namespace");
            registered.push(prefix.clone());
        }

        *self.registration.lock() = NamespaceRegistration {
            registered,
            overwritten,
        };
        Ok(())
    }

    async fn unregister_namespaces(
        &self,
        session: &Arc<dyn Session>,
        registration: &NamespaceRegistration,
    ) -> DataAccessResult<()> {
        let registry = session.namespace_registry()?;
        for prefix in &registration.registered {
            registry.unregister_namespace(prefix).await?;
            tracing::debug!(%prefix, "unregistered namespace");
        }
        for (prefix, uri) in &registration.overwritten {
            registry.register_namespace(prefix, uri).await?;
            tracing::debug!(%prefix, %uri, "restored namespace");
        }
        Ok(())
    }

    async fn add_listeners(&self, session: &Arc<dyn Session>) -> DataAccessResult<()> {
        if self.event_listeners.is_empty() {
            return Ok(());
        }
        let manager = session.observation_manager()?;
        for definition in &self.event_listeners {
            manager.add_event_listener(definition).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for RepositorySessionFactory {
    fn binding_key(&self) -> BindingKey {
        self.key
    }

    async fn get_session(&self) -> DataAccessResult<Arc<dyn Session>> {
        let session = self.login().await?;
        if let Err(e) = self.add_listeners(&session).await {
            self.release_session(&session).await;
            return Err(e);
        }
        Ok(session)
    }

    fn get_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder {
        let provider = self.holder_provider.get_or_init(|| {
            self.provider_manager
                .session_provider(session.repository_name().as_deref())
        });
        provider.create_session_holder(session)
    }

    async fn release_session(&self, session: &Arc<dyn Session>) {
        if let Err(e) = session.logout().await {
            tracing::warn!(error = %e, "could not close repository session");
        }
    }
}

impl fmt::Display for RepositorySessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepositorySessionFactory[{}]", self.key)
    }
}

impl fmt::Debug for RepositorySessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySessionFactory")
            .field("key", &self.key)
            .field("workspace_name", &self.workspace_name)
            .field("credentials", &self.credentials)
            .field("namespaces", &self.namespaces)
            .field("event_listeners", &self.event_listeners.len())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct SessionFactoryBuilder {
    repository: Option<Arc<dyn Repository>>,
    workspace_name: Option<String>,
    credentials: Option<Credentials>,
    namespaces: NamespaceSettings,
    event_listeners: Vec<EventListenerDefinition>,
    provider_manager: Option<Arc<dyn ProviderManager>>,
}

impl SessionFactoryBuilder {
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn workspace_name(mut self, workspace_name: impl Into<String>) -> Self {
        self.workspace_name = Some(workspace_name.into());
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn namespaces(mut self, namespaces: NamespaceSettings) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn event_listener(mut self, definition: EventListenerDefinition) -> Self {
        self.event_listeners.push(definition);
        self
    }

    pub fn provider_manager(mut self, manager: Arc<dyn ProviderManager>) -> Self {
        self.provider_manager = Some(manager);
        self
    }

    /// Builds the factory; a repository is required.
    ///
    /// Without an explicit provider manager, repositories named
    /// `Jackrabbit` get transactional holders and all others plain ones.
    pub fn build(self) -> DataAccessResult<RepositorySessionFactory> {
        let repository = self
            .repository
            .ok_or_else(|| DataAccessError::configuration("repository is required"))?;
        let provider_manager = self.provider_manager.unwrap_or_else(|| {
            Arc::new(
                ListProviderManager::builder()
                    .register(XaSessionHolderProvider::default())
                    .build(),
            )
        });

        Ok(RepositorySessionFactory {
            key: BindingKey::new(),
            repository,
            workspace_name: self.workspace_name,
            credentials: self.credentials,
            namespaces: self.namespaces,
            event_listeners: self.event_listeners,
            provider_manager,
            holder_provider: OnceLock::new(),
            registration: Mutex::new(NamespaceRegistration::default()),
        })
    }
}

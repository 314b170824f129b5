//! Selection of the [`SessionHolder`] construction strategy for a repository.
//!
//! Repository implementations expose different transactional capabilities.
//! A [`SessionHolderProvider`] knows how to pull those capabilities out of a
//! session of one implementation; a [`ProviderManager`] picks the provider
//! matching the repository name and always falls back to the generic one.

use std::sync::{Arc, OnceLock};

use crate::holder::SessionHolder;
use crate::session::Session;

pub type ProviderRef = Arc<dyn SessionHolderProvider>;

/// Builds session holders for a family of repository implementations.
pub trait SessionHolderProvider: Send + Sync {
    fn accepts_repository(&self, repository_name: &str) -> bool;

    fn create_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder;
}

/// Accepts every repository and builds plain holders.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericSessionHolderProvider;

impl SessionHolderProvider for GenericSessionHolderProvider {
    fn accepts_repository(&self, _repository_name: &str) -> bool {
        true
    }

    fn create_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder {
        SessionHolder::new(session)
    }
}

/// Builds transactional holders for repositories whose sessions expose a
/// two-phase-commit resource.
#[derive(Debug, Clone)]
pub struct XaSessionHolderProvider {
    repository_names: Vec<String>,
}

impl XaSessionHolderProvider {
    pub const JACKRABBIT: &'static str = "Jackrabbit";

    pub fn new<I, S>(repository_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repository_names: repository_names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for XaSessionHolderProvider {
    fn default() -> Self {
        Self::new([Self::JACKRABBIT])
    }
}

impl SessionHolderProvider for XaSessionHolderProvider {
    fn accepts_repository(&self, repository_name: &str) -> bool {
        self.repository_names.iter().any(|n| n == repository_name)
    }

    fn create_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder {
        match session.xa_resource() {
            Some(resource) => SessionHolder::transactional(session, resource),
            None => {
                tracing::warn!("session does not expose an XA resource; using a plain session holder");
                SessionHolder::new(session)
            }
        }
    }
}

/// Ordered collection of providers plus a default.
pub trait ProviderManager: Send + Sync {
    /// Registered providers, in lookup order.
    fn providers(&self) -> Arc<[ProviderRef]>;

    fn default_provider(&self) -> ProviderRef {
        Arc::new(GenericSessionHolderProvider)
    }

    /// Returns the first provider accepting `repository_name`, or the default.
    fn session_provider(&self, repository_name: Option<&str>) -> ProviderRef {
        let Some(name) = repository_name else {
            return self.default_provider();
        };

        let providers = self.providers();
        match providers.iter().find(|p| p.accepts_repository(name)) {
            Some(provider) => {
                tracing::debug!(repository = name, "specific session holder provider found");
                provider.clone()
            }
            None => {
                tracing::debug!(
                    repository = name,
                    "no specific session holder provider found; using the default one"
                );
                self.default_provider()
            }
        }
    }
}

/// A fixed provider list given at configuration time.
#[derive(Clone)]
pub struct ListProviderManager {
    providers: Arc<[ProviderRef]>,
    default_provider: ProviderRef,
}

impl ListProviderManager {
    pub fn new(providers: Vec<ProviderRef>) -> Self {
        Self::builder().register_all(providers).build()
    }

    pub fn builder() -> ProviderManagerBuilder {
        ProviderManagerBuilder::default()
    }
}

impl Default for ListProviderManager {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ProviderManager for ListProviderManager {
    fn providers(&self) -> Arc<[ProviderRef]> {
        self.providers.clone()
    }

    fn default_provider(&self) -> ProviderRef {
        self.default_provider.clone()
    }
}

#[derive(Default)]
pub struct ProviderManagerBuilder {
    providers: Vec<ProviderRef>,
    default_provider: Option<ProviderRef>,
}

impl ProviderManagerBuilder {
    pub fn register(mut self, provider: impl SessionHolderProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn register_all(mut self, providers: impl IntoIterator<Item = ProviderRef>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Replaces the generic fallback provider.
    pub fn default_provider(mut self, provider: impl SessionHolderProvider + 'static) -> Self {
        self.default_provider = Some(Arc::new(provider));
        self
    }

    pub fn build(self) -> ListProviderManager {
        ListProviderManager {
            providers: self.providers.into(),
            default_provider: self
                .default_provider
                .unwrap_or_else(|| Arc::new(GenericSessionHolderProvider)),
        }
    }
}

type ProviderConstructor = Box<dyn Fn() -> ProviderRef + Send + Sync>;

/// Providers contributed as constructors, instantiated on every lookup.
///
/// Wrap it in a [`CachedProviderManager`] once the registrations are final.
#[derive(Default)]
pub struct RegisteredProviderManager {
    constructors: Vec<ProviderConstructor>,
}

impl RegisteredProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, constructor: F) -> Self
    where
        F: Fn() -> ProviderRef + Send + Sync + 'static,
    {
        self.constructors.push(Box::new(constructor));
        self
    }
}

impl ProviderManager for RegisteredProviderManager {
    fn providers(&self) -> Arc<[ProviderRef]> {
        self.constructors.iter().map(|c| c()).collect()
    }
}

/// Computes the inner manager's provider list once and reuses it.
pub struct CachedProviderManager<M> {
    inner: M,
    providers: OnceLock<Arc<[ProviderRef]>>,
}

impl<M: ProviderManager> CachedProviderManager<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            providers: OnceLock::new(),
        }
    }
}

impl<M: ProviderManager> ProviderManager for CachedProviderManager<M> {
    fn providers(&self) -> Arc<[ProviderRef]> {
        self.providers
            .get_or_init(|| self.inner.providers())
            .clone()
    }

    fn default_provider(&self) -> ProviderRef {
        self.inner.default_provider()
    }
}

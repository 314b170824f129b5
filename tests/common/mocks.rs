use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use jcr_unit_of_work::{
    BindingKey, Credentials, DataAccessError, DataAccessResult, EventListener,
    EventListenerDefinition, GenericSessionHolderProvider, LockManager, NamespaceRegistry,
    ObservationManager, Repository, RepositoryError, RepositoryResult, Session, SessionFactory,
    SessionHolder, SessionHolderProvider, Vote, XaError, XaFlags, XaResource, XaResult,
    XaSessionHolderProvider, Xid,
};

/// Ordered record of the calls made on the mocks of one test.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Calls of an XA resource that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaStep {
    Start,
    End,
    Prepare,
    Commit,
    Rollback,
}

pub struct MockXaResource {
    log: CallLog,
    vote: Mutex<Vote>,
    failures: Mutex<HashMap<XaStep, XaError>>,
}

impl MockXaResource {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            vote: Mutex::new(Vote::Ok),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_vote(&self, vote: Vote) {
        *self.vote.lock() = vote;
    }

    /// Makes the next call of `step` fail with `error`. The call is still logged.
    pub fn fail(&self, step: XaStep, error: XaError) {
        self.failures.lock().insert(step, error);
    }

    pub fn fail_prepare(&self, error: XaError) {
        self.fail(XaStep::Prepare, error);
    }

    fn outcome(&self, step: XaStep) -> XaResult<()> {
        match self.failures.lock().remove(&step) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl XaResource for MockXaResource {
    async fn start(&self, _xid: &Xid, flags: XaFlags) -> XaResult<()> {
        assert_eq!(flags, XaFlags::NoFlags);
        self.log.record("xa.start");
        self.outcome(XaStep::Start)
    }

    async fn end(&self, _xid: &Xid, flags: XaFlags) -> XaResult<()> {
        self.log.record(format!("xa.end({flags:?})"));
        self.outcome(XaStep::End)
    }

    async fn prepare(&self, _xid: &Xid) -> XaResult<Vote> {
        self.log.record("xa.prepare");
        self.outcome(XaStep::Prepare)?;
        Ok(*self.vote.lock())
    }

    async fn commit(&self, _xid: &Xid, one_phase: bool) -> XaResult<()> {
        assert!(!one_phase);
        self.log.record("xa.commit");
        self.outcome(XaStep::Commit)
    }

    async fn rollback(&self, _xid: &Xid) -> XaResult<()> {
        self.log.record("xa.rollback");
        self.outcome(XaStep::Rollback)
    }
}

pub struct MockLockManager {
    tokens: Mutex<Vec<String>>,
}

impl MockLockManager {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LockManager for MockLockManager {
    async fn add_lock_token(&self, token: &str) -> RepositoryResult<()> {
        self.tokens.lock().push(token.to_string());
        Ok(())
    }

    async fn remove_lock_token(&self, token: &str) -> RepositoryResult<()> {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|t| t != token);
        if tokens.len() == before {
            return Err(RepositoryError::LockConflict(format!("unknown lock token {token}")));
        }
        Ok(())
    }

    async fn lock_tokens(&self) -> RepositoryResult<Vec<String>> {
        Ok(self.tokens.lock().clone())
    }
}

pub struct MockNamespaceRegistry {
    log: CallLog,
    namespaces: Mutex<BTreeMap<String, String>>,
}

impl MockNamespaceRegistry {
    pub fn new(log: CallLog, existing: &[(&str, &str)]) -> Self {
        Self {
            log,
            namespaces: Mutex::new(
                existing
                    .iter()
                    .map(|(p, u)| (p.to_string(), u.to_string()))
                    .collect(),
            ),
        }
    }

    pub fn uri_of(&self, prefix: &str) -> Option<String> {
        self.namespaces.lock().get(prefix).cloned()
    }
}

#[async_trait]
impl NamespaceRegistry for MockNamespaceRegistry {
    async fn prefixes(&self) -> RepositoryResult<Vec<String>> {
        self.log.record("ns.prefixes");
        Ok(self.namespaces.lock().keys().cloned().collect())
    }

    async fn uri(&self, prefix: &str) -> RepositoryResult<String> {
        self.log.record(format!("ns.uri({prefix})"));
        self.uri_of(prefix)
            .ok_or_else(|| RepositoryError::Namespace(format!("unknown prefix {prefix}")))
    }

    async fn register_namespace(&self, prefix: &str, uri: &str) -> RepositoryResult<()> {
        self.log.record(format!("ns.register({prefix}={uri})"));
        self.namespaces.lock().insert(prefix.to_string(), uri.to_string());
        Ok(())
    }

    async fn unregister_namespace(&self, prefix: &str) -> RepositoryResult<()> {
        self.log.record(format!("ns.unregister({prefix})"));
        self.namespaces.lock().remove(prefix);
        Ok(())
    }
}

pub struct MockObservationManager {
    log: CallLog,
}

impl MockObservationManager {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl ObservationManager for MockObservationManager {
    async fn add_event_listener(&self, definition: &EventListenerDefinition) -> RepositoryResult<()> {
        self.log
            .record(format!("observation.add_event_listener({})", definition.abs_path));
        Ok(())
    }
}

pub struct NoopListener;

impl EventListener for NoopListener {
    fn on_event(&self, _events: &[jcr_unit_of_work::Event]) {}
}

pub struct MockSession {
    log: CallLog,
    repository_name: Option<String>,
    live: AtomicBool,
    xa: Option<Arc<MockXaResource>>,
    save_error: Mutex<Option<RepositoryError>>,
    items: Mutex<BTreeSet<String>>,
    lock_manager: Option<Arc<MockLockManager>>,
    namespace_registry: Option<Arc<MockNamespaceRegistry>>,
    observation_manager: Option<Arc<MockObservationManager>>,
}

impl MockSession {
    pub fn plain(log: CallLog) -> Self {
        Self {
            log,
            repository_name: None,
            live: AtomicBool::new(true),
            xa: None,
            save_error: Mutex::new(None),
            items: Mutex::new(BTreeSet::new()),
            lock_manager: None,
            namespace_registry: None,
            observation_manager: None,
        }
    }

    pub fn transactional(log: CallLog) -> Self {
        let xa = Arc::new(MockXaResource::new(log.clone()));
        Self {
            xa: Some(xa),
            ..Self::plain(log)
        }
    }

    pub fn with_repository_name(mut self, name: &str) -> Self {
        self.repository_name = Some(name.to_string());
        self
    }

    pub fn with_items(self, paths: &[&str]) -> Self {
        self.items.lock().extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_lock_manager(mut self, manager: Arc<MockLockManager>) -> Self {
        self.lock_manager = Some(manager);
        self
    }

    pub fn with_namespace_registry(mut self, registry: Arc<MockNamespaceRegistry>) -> Self {
        self.namespace_registry = Some(registry);
        self
    }

    pub fn with_observation_manager(mut self, manager: Arc<MockObservationManager>) -> Self {
        self.observation_manager = Some(manager);
        self
    }

    pub fn xa(&self) -> Option<&Arc<MockXaResource>> {
        self.xa.as_ref()
    }

    pub fn fail_next_save(&self, error: RepositoryError) {
        *self.save_error.lock() = Some(error);
    }
}

#[async_trait]
impl Session for MockSession {
    fn repository_name(&self) -> Option<String> {
        self.repository_name.clone()
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn save(&self) -> RepositoryResult<()> {
        if let Some(error) = self.save_error.lock().take() {
            return Err(error);
        }
        self.log.record("session.save");
        Ok(())
    }

    async fn refresh(&self, keep_changes: bool) -> RepositoryResult<()> {
        self.log.record(format!("session.refresh({keep_changes})"));
        Ok(())
    }

    async fn has_pending_changes(&self) -> RepositoryResult<bool> {
        Ok(false)
    }

    async fn item_exists(&self, path: &str) -> RepositoryResult<bool> {
        Ok(self.items.lock().contains(path))
    }

    async fn remove_item(&self, path: &str) -> RepositoryResult<()> {
        if !self.items.lock().remove(path) {
            return Err(RepositoryError::PathNotFound(path.to_string()));
        }
        self.log.record(format!("session.remove_item({path})"));
        Ok(())
    }

    async fn logout(&self) -> RepositoryResult<()> {
        self.log.record("session.logout");
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        self.xa.clone().map(|xa| xa as Arc<dyn XaResource>)
    }

    fn lock_manager(&self) -> RepositoryResult<Arc<dyn LockManager>> {
        self.lock_manager
            .clone()
            .map(|m| m as Arc<dyn LockManager>)
            .ok_or_else(|| RepositoryError::UnsupportedOperation("locking".to_string()))
    }

    fn namespace_registry(&self) -> RepositoryResult<Arc<dyn NamespaceRegistry>> {
        self.namespace_registry
            .clone()
            .map(|r| r as Arc<dyn NamespaceRegistry>)
            .ok_or_else(|| RepositoryError::UnsupportedOperation("namespaces".to_string()))
    }

    fn observation_manager(&self) -> RepositoryResult<Arc<dyn ObservationManager>> {
        self.observation_manager
            .clone()
            .map(|m| m as Arc<dyn ObservationManager>)
            .ok_or_else(|| RepositoryError::UnsupportedOperation("observation".to_string()))
    }
}

/// Session factory handing out fresh mock sessions and counting them.
pub struct MockSessionFactory {
    key: BindingKey,
    log: CallLog,
    transactional: bool,
    created: AtomicUsize,
    released: AtomicUsize,
    fail_login: AtomicBool,
    vote: Mutex<Vote>,
    xa_failures: Mutex<Vec<(XaStep, XaError)>>,
    last_session: Mutex<Option<Arc<MockSession>>>,
}

impl MockSessionFactory {
    fn with_capability(transactional: bool) -> Arc<Self> {
        Arc::new(Self {
            key: BindingKey::new(),
            log: CallLog::new(),
            transactional,
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            vote: Mutex::new(Vote::Ok),
            xa_failures: Mutex::new(Vec::new()),
            last_session: Mutex::new(None),
        })
    }

    /// Sessions without two-phase-commit support.
    pub fn plain() -> Arc<Self> {
        Self::with_capability(false)
    }

    /// Sessions exposing an XA resource, wrapped in transactional holders.
    pub fn transactional() -> Arc<Self> {
        Self::with_capability(true)
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.last_session.lock().clone()
    }

    pub fn fail_next_login(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    pub fn set_vote(&self, vote: Vote) {
        *self.vote.lock() = vote;
    }

    /// Makes `step` fail on the XA resource of the next session handed out.
    pub fn fail_xa(&self, step: XaStep, error: XaError) {
        self.xa_failures.lock().push((step, error));
    }

    pub fn fail_prepare(&self, error: XaError) {
        self.fail_xa(XaStep::Prepare, error);
    }

    /// A session not produced through `get_session`, for pre-binding.
    pub fn detached_session(&self) -> Arc<MockSession> {
        let session = if self.transactional {
            MockSession::transactional(self.log.clone())
        } else {
            MockSession::plain(self.log.clone())
        };
        Arc::new(session)
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    fn binding_key(&self) -> BindingKey {
        self.key
    }

    async fn get_session(&self) -> DataAccessResult<Arc<dyn Session>> {
        if self.fail_login.swap(false, Ordering::SeqCst) {
            return Err(DataAccessError::resource_unavailable(
                "could not open repository session",
                RepositoryError::Login("access refused".to_string()),
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.log.record("factory.get_session");

        let session = self.detached_session();
        if let Some(xa) = session.xa() {
            xa.set_vote(*self.vote.lock());
            for (step, error) in self.xa_failures.lock().drain(..) {
                xa.fail(step, error);
            }
        }
        *self.last_session.lock() = Some(session.clone());
        Ok(session as Arc<dyn Session>)
    }

    fn get_session_holder(&self, session: Arc<dyn Session>) -> SessionHolder {
        if self.transactional {
            XaSessionHolderProvider::default().create_session_holder(session)
        } else {
            GenericSessionHolderProvider.create_session_holder(session)
        }
    }

    async fn release_session(&self, session: &Arc<dyn Session>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.log.record("factory.release_session");
        let _ = session.logout().await;
    }
}

/// Repository handing out one configured session, or fresh plain ones.
pub struct MockRepository {
    log: CallLog,
    descriptors: HashMap<String, String>,
    session: Option<Arc<MockSession>>,
    login_error: Mutex<Option<RepositoryError>>,
    logins: AtomicUsize,
}

impl MockRepository {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            descriptors: HashMap::new(),
            session: None,
            login_error: Mutex::new(None),
            logins: AtomicUsize::new(0),
        }
    }

    pub fn with_descriptor(mut self, key: &str, value: &str) -> Self {
        self.descriptors.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_session(mut self, session: Arc<MockSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn fail_next_login(&self, error: RepositoryError) {
        *self.login_error.lock() = Some(error);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn login(
        &self,
        credentials: Option<&Credentials>,
        workspace: Option<&str>,
    ) -> RepositoryResult<Arc<dyn Session>> {
        if let Some(error) = self.login_error.lock().take() {
            return Err(error);
        }
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!(
            "repository.login({}@{})",
            credentials.map_or("anonymous", |c| c.user_id.as_str()),
            workspace.unwrap_or("default"),
        ));

        let session = match &self.session {
            Some(session) => session.clone(),
            None => Arc::new(MockSession::plain(self.log.clone())),
        };
        Ok(session as Arc<dyn Session>)
    }

    fn descriptor(&self, key: &str) -> Option<String> {
        self.descriptors.get(key).cloned()
    }
}

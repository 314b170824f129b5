use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult, XaResult};

/// Descriptor key holding the repository implementation name.
pub const REP_NAME_DESC: &str = "jcr.repository.name";

/// An authenticated connection to the content repository.
///
/// Everything beyond what the binding and transaction layer needs is left to
/// the repository implementation. Optional capabilities (locking, namespaces,
/// observation, two-phase commit) default to "unsupported".
#[async_trait]
pub trait Session: Send + Sync {
    /// Name of the repository implementation behind this session.
    fn repository_name(&self) -> Option<String> {
        None
    }

    fn user_id(&self) -> Option<String> {
        None
    }

    fn workspace_name(&self) -> Option<String> {
        None
    }

    fn is_live(&self) -> bool;

    /// Persists all pending changes.
    async fn save(&self) -> RepositoryResult<()>;

    /// Reloads the session state, discarding pending changes unless `keep_changes`.
    async fn refresh(&self, keep_changes: bool) -> RepositoryResult<()>;

    async fn has_pending_changes(&self) -> RepositoryResult<bool>;

    async fn item_exists(&self, path: &str) -> RepositoryResult<bool>;

    async fn remove_item(&self, path: &str) -> RepositoryResult<()>;

    /// Closes the session.
    async fn logout(&self) -> RepositoryResult<()>;

    /// The two-phase-commit resource of this session, when the repository offers one.
    fn xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        None
    }

    fn lock_manager(&self) -> RepositoryResult<Arc<dyn LockManager>> {
        Err(RepositoryError::UnsupportedOperation(
            "locking is not supported".to_string(),
        ))
    }

    fn namespace_registry(&self) -> RepositoryResult<Arc<dyn NamespaceRegistry>> {
        Err(RepositoryError::UnsupportedOperation(
            "namespace registration is not supported".to_string(),
        ))
    }

    fn observation_manager(&self) -> RepositoryResult<Arc<dyn ObservationManager>> {
        Err(RepositoryError::UnsupportedOperation(
            "observation is not supported".to_string(),
        ))
    }
}

/// Identity of a transaction branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub format_id: i32,
    pub global_id: Uuid,
    pub branch_qualifier: u32,
}

impl Xid {
    pub const FORMAT_ID: i32 = 0x4A43_5258;

    /// A fresh transaction id with a random global part.
    pub fn new() -> Self {
        Self {
            format_id: Self::FORMAT_ID,
            global_id: Uuid::new_v4(),
            branch_qualifier: 1,
        }
    }
}

impl Default for Xid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}:{}", self.format_id, self.global_id, self.branch_qualifier)
    }
}

/// Flags passed to `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaFlags {
    NoFlags,
    Success,
    Fail,
}

/// Outcome of the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Work was done and can be committed.
    Ok,
    /// Nothing was written; there is nothing to commit.
    ReadOnly,
}

/// Two-phase-commit resource exposed by transactional sessions.
#[async_trait]
pub trait XaResource: Send + Sync {
    async fn start(&self, xid: &Xid, flags: XaFlags) -> XaResult<()>;

    async fn end(&self, xid: &Xid, flags: XaFlags) -> XaResult<()>;

    async fn prepare(&self, xid: &Xid) -> XaResult<Vote>;

    async fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    async fn rollback(&self, xid: &Xid) -> XaResult<()>;
}

/// Login credentials for the repository.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"***")
            .finish()
    }
}

/// The repository sessions are opened against.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn login(
        &self,
        credentials: Option<&Credentials>,
        workspace: Option<&str>,
    ) -> RepositoryResult<Arc<dyn Session>>;

    fn descriptor(&self, key: &str) -> Option<String>;
}

#[async_trait]
pub trait LockManager: Send + Sync {
    async fn add_lock_token(&self, token: &str) -> RepositoryResult<()>;

    async fn remove_lock_token(&self, token: &str) -> RepositoryResult<()>;

    async fn lock_tokens(&self) -> RepositoryResult<Vec<String>>;
}

#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    async fn prefixes(&self) -> RepositoryResult<Vec<String>>;

    async fn uri(&self, prefix: &str) -> RepositoryResult<String>;

    async fn register_namespace(&self, prefix: &str, uri: &str) -> RepositoryResult<()>;

    async fn unregister_namespace(&self, prefix: &str) -> RepositoryResult<()>;
}

/// A change observed in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: u32,
    pub path: String,
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, events: &[Event]);
}

/// Registration parameters for an [`EventListener`].
#[derive(Clone)]
pub struct EventListenerDefinition {
    pub listener: Arc<dyn EventListener>,
    pub event_types: u32,
    pub abs_path: String,
    pub deep: bool,
    pub uuids: Option<Vec<String>>,
    pub node_type_names: Option<Vec<String>>,
    pub no_local: bool,
}

impl EventListenerDefinition {
    pub const NODE_ADDED: u32 = 0x1;
    pub const NODE_REMOVED: u32 = 0x2;
    pub const PROPERTY_ADDED: u32 = 0x4;
    pub const PROPERTY_REMOVED: u32 = 0x8;
    pub const PROPERTY_CHANGED: u32 = 0x10;
    pub const ALL_EVENTS: u32 = Self::NODE_ADDED
        | Self::NODE_REMOVED
        | Self::PROPERTY_ADDED
        | Self::PROPERTY_REMOVED
        | Self::PROPERTY_CHANGED;

    /// Listens to every event type on the whole tree.
    pub fn new(listener: Arc<dyn EventListener>) -> Self {
        Self {
            listener,
            event_types: Self::ALL_EVENTS,
            abs_path: "/".to_string(),
            deep: true,
            uuids: None,
            node_type_names: None,
            no_local: false,
        }
    }

    pub fn with_event_types(mut self, event_types: u32) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_path(mut self, abs_path: impl Into<String>, deep: bool) -> Self {
        self.abs_path = abs_path.into();
        self.deep = deep;
        self
    }
}

impl fmt::Debug for EventListenerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerDefinition")
            .field("event_types", &self.event_types)
            .field("abs_path", &self.abs_path)
            .field("deep", &self.deep)
            .field("uuids", &self.uuids)
            .field("node_type_names", &self.node_type_names)
            .field("no_local", &self.no_local)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObservationManager: Send + Sync {
    async fn add_event_listener(&self, definition: &EventListenerDefinition) -> RepositoryResult<()>;
}

//! Content Repository Unit of Work
//!
//! This crate lets application code run units of work against a content
//! repository session as if the session took part in the surrounding
//! transaction. One session is bound per unit of work in a task-local
//! [`ResourceRegistry`], reused by nested calls and released exactly once by
//! whoever opened it. Sessions exposing a two-phase-commit resource are driven
//! by the [`LocalTransactionManager`]; repository failures are translated into
//! a small, stable [`DataAccessError`] taxonomy.

pub mod binding;
pub mod error;
pub mod factory;
pub mod holder;
pub mod interceptor;
pub mod mapping;
pub mod open_session_in_view;
pub mod provider;
pub mod session;
pub mod session_utils;
pub mod template;
pub mod transaction;
pub mod transaction_aware;
pub mod translator;

pub use binding::{BindingKey, ResourceRegistry};
pub use error::{
    DataAccessError, DataAccessResult, ErrorCategory, RepositoryError, RepositoryResult, XaError,
    XaResult,
};
pub use factory::{NamespaceSettings, RepositorySessionFactory, SessionFactory, SessionFactoryBuilder};
pub use holder::{SessionHolder, SessionKind};
pub use interceptor::SessionInterceptor;
pub use mapping::{MappingTemplate, ObjectContentManager, ObjectContentManagerFactory, Query};
pub use open_session_in_view::{OpenSessionInViewInterceptor, RequestAttributes, PARTICIPATE_SUFFIX};
pub use provider::{
    CachedProviderManager, GenericSessionHolderProvider, ListProviderManager, ProviderManager,
    RegisteredProviderManager, SessionHolderProvider, XaSessionHolderProvider,
};
pub use session::{
    Credentials, Event, EventListener, EventListenerDefinition, LockManager, NamespaceRegistry,
    ObservationManager, Repository, Session, Vote, XaFlags, XaResource, Xid, REP_NAME_DESC,
};
pub use template::{SessionTemplate, TemplateSettings};
pub use transaction::{
    Isolation, LocalTransactionManager, TransactionDefinition, TransactionManager, TransactionState,
    TransactionStatus, TransactionTemplate,
};
pub use transaction_aware::TransactionAware;
pub use translator::translate;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use jcr_unit_of_work::{
    DataAccessResult, ObjectContentManager, ObjectContentManagerFactory, Query, RepositoryError,
    RepositoryResult, Session, TransactionAware,
};

use super::entities::Article;

pub type ArticleStore = Arc<RwLock<BTreeMap<String, Article>>>;

/// Transaction-aware cache of article titles
pub struct ArticleCache {
    staged: RwLock<Vec<String>>,
    visible: RwLock<Vec<String>>,
    // Track notifications for verification in tests
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl ArticleCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            staged: RwLock::new(Vec::new()),
            visible: RwLock::new(Vec::new()),
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub fn stage(&self, title: &str) {
        self.staged.write().push(title.to_string());
    }

    pub fn visible_titles(&self) -> Vec<String> {
        self.visible.read().clone()
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for ArticleCache {
    async fn on_commit(&self) -> DataAccessResult<()> {
        let staged = std::mem::take(&mut *self.staged.write());
        self.visible.write().extend(staged);
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> DataAccessResult<()> {
        self.staged.write().clear();
        *self.rolled_back.write() = true;
        Ok(())
    }
}

/// In-memory object content manager for articles
pub struct ArticleManager {
    session: Arc<dyn Session>,
    store: ArticleStore,
}

#[async_trait]
impl ObjectContentManager for ArticleManager {
    type Object = Article;

    async fn insert(&self, article: &Article) -> RepositoryResult<()> {
        let mut store = self.store.write();
        if store.contains_key(&article.path) {
            return Err(RepositoryError::ItemExists(article.path.clone()));
        }
        store.insert(article.path.clone(), article.clone());
        Ok(())
    }

    async fn update(&self, article: &Article) -> RepositoryResult<()> {
        let mut store = self.store.write();
        match store.get_mut(&article.path) {
            Some(existing) => {
                *existing = article.clone();
                Ok(())
            }
            None => Err(RepositoryError::PathNotFound(article.path.clone())),
        }
    }

    async fn remove(&self, path: &str) -> RepositoryResult<()> {
        self.store
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::PathNotFound(path.to_string()))
    }

    async fn get_object(&self, path: &str) -> RepositoryResult<Option<Article>> {
        Ok(self.store.read().get(path).cloned())
    }

    async fn get_objects(&self, query: &Query) -> RepositoryResult<Vec<Article>> {
        if query.type_name != "Article" {
            return Err(RepositoryError::NoSuchNodeType(query.type_name.clone()));
        }
        let store = self.store.read();
        Ok(store
            .values()
            .filter(|a| query.scope.as_ref().map_or(true, |s| a.path.starts_with(s.as_str())))
            .filter(|a| query.filter.as_ref().map_or(true, |f| a.title.contains(f.as_str())))
            .cloned()
            .collect())
    }

    async fn object_exists(&self, path: &str) -> RepositoryResult<bool> {
        Ok(self.store.read().contains_key(path))
    }

    async fn save(&self) -> RepositoryResult<()> {
        self.session.save().await
    }
}

pub struct ArticleManagerFactory {
    store: ArticleStore,
    last_session: RwLock<Option<Arc<dyn Session>>>,
}

impl ArticleManagerFactory {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(BTreeMap::new())),
            last_session: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    /// Session the most recently created manager works on.
    pub fn last_session(&self) -> Option<Arc<dyn Session>> {
        self.last_session.read().clone()
    }
}

impl ObjectContentManagerFactory for ArticleManagerFactory {
    type Manager = ArticleManager;

    fn create(&self, session: Arc<dyn Session>) -> ArticleManager {
        *self.last_session.write() = Some(session.clone());
        ArticleManager {
            session,
            store: self.store.clone(),
        }
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use failscope_core::{FilterField, FilterOptions, FilterSet, Issue, SampleSizeRow, ScopeId};
use failscope_store::{SqliteStore, Store};

use crate::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Drop issues whose status is `retest pass`.
    pub exclude_resolved: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            exclude_resolved: true,
        }
    }
}

/// Where issues and sample-size tables come from. Unknown scopes read as empty.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        options: FetchOptions,
    ) -> Result<Vec<Issue>, QueryError>;

    async fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, QueryError>;

    async fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, QueryError>;
}

/// SQLite-backed source. Queries run on the blocking pool, one at a time.
#[derive(Clone)]
pub struct StoreSource {
    store: Arc<Mutex<SqliteStore>>,
}

impl StoreSource {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    async fn with_store<T, F>(&self, work: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, failscope_store::StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let store = store.lock().unwrap_or_else(PoisonError::into_inner);
            work(&store)
        })
        .await
        .map_err(|err| QueryError::Task(format!("sqlite query task failed: {err}")))?
        .map_err(QueryError::from)
    }
}

#[async_trait]
impl RecordSource for StoreSource {
    async fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        options: FetchOptions,
    ) -> Result<Vec<Issue>, QueryError> {
        let filters = filters.clone();
        self.with_store(move |store| store.fetch_issues(scope, &filters, options.exclude_resolved))
            .await
    }

    async fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, QueryError> {
        self.with_store(move |store| store.fetch_sample_sizes(scope))
            .await
    }

    async fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, QueryError> {
        let filters = filters.clone();
        self.with_store(move |store| store.filter_options(scope, &filters))
            .await
    }
}

#[derive(Debug, Clone, Default)]
struct ScopeData {
    issues: Vec<Issue>,
    sample_sizes: Vec<SampleSizeRow>,
}

/// Source over records held in memory, filtered with the same rules the SQL predicates use.
#[derive(Debug, Default)]
pub struct InMemorySource {
    scopes: RwLock<HashMap<ScopeId, ScopeData>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_issues(&self, scope: ScopeId, issues: Vec<Issue>) {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        scopes.entry(scope).or_default().issues = issues;
    }

    pub fn set_sample_sizes(&self, scope: ScopeId, rows: Vec<SampleSizeRow>) {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        scopes.entry(scope).or_default().sample_sizes = rows;
    }

    pub fn remove_scope(&self, scope: ScopeId) -> bool {
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        scopes.remove(&scope).is_some()
    }

    fn read<T>(&self, scope: ScopeId, read: impl FnOnce(&ScopeData) -> T) -> T
    where
        T: Default,
    {
        let scopes = self.scopes.read().unwrap_or_else(PoisonError::into_inner);
        scopes.get(&scope).map(read).unwrap_or_default()
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        options: FetchOptions,
    ) -> Result<Vec<Issue>, QueryError> {
        Ok(self.read(scope, |data| {
            data.issues
                .iter()
                .filter(|issue| !(options.exclude_resolved && issue.is_resolved()))
                .filter(|issue| filters.matches(issue))
                .cloned()
                .collect()
        }))
    }

    async fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, QueryError> {
        Ok(self.read(scope, |data| data.sample_sizes.clone()))
    }

    async fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, QueryError> {
        Ok(self.read(scope, |data| {
            let mut options = FilterOptions::default();
            for field in FilterField::ALL {
                let others = filters.without(field);
                let values: BTreeSet<String> = data
                    .issues
                    .iter()
                    .filter(|issue| others.matches(issue))
                    .filter_map(|issue| issue.field_value(field))
                    .map(|value| value.trim().to_owned())
                    .collect();
                options.insert_sorted(field, values.into_iter().collect());
            }
            options
        }))
    }
}

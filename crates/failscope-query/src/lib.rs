mod request;
mod service;
mod source;

use std::sync::Arc;
use std::time::Duration;

use failscope_analysis::AnalysisError;
use failscope_cache::CacheError;
use failscope_core::CoreError;
use failscope_store::StoreError;
use thiserror::Error;

pub use request::{
    CrossTabQuery, FailureRateQuery, FrMatrix, FrMatrixQuery, SampleSizeQuery, SummaryQuery,
};
pub use service::{CachedResult, FailureRateService};
pub use source::{FetchOptions, InMemorySource, RecordSource, StoreSource};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode cache key: {0}")]
    CacheKey(#[from] serde_json::Error),
    #[error("record source task failed: {0}")]
    Task(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("cached result for '{key}' has an unexpected shape")]
    CacheShape { key: String },
    /// Failure of a computation shared by several de-duplicated callers.
    #[error("{0}")]
    Shared(Arc<QueryError>),
}

impl QueryError {
    /// The underlying error with any sharing wrappers peeled off.
    pub fn root(&self) -> &QueryError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidRequest(_) | Self::Core(_) | Self::Analysis(_)
        )
    }
}

impl From<CacheError<QueryError>> for QueryError {
    fn from(err: CacheError<QueryError>) -> Self {
        match err {
            CacheError::Timeout(after) => Self::Timeout(after),
            CacheError::Compute(inner) => Self::Shared(inner),
        }
    }
}

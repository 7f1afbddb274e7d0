use std::future::Future;
use std::sync::Arc;

use failscope_analysis::{
    AggregateRequest, AnalysisOptions, CrossTab, CrossTabRequest, GroupedFailureRate,
    SampleSizeByGroup, SampleSizeRequest, StationIndex, Summary, SummaryRequest, aggregate,
    cross_tabulate, sample_size_by_group, summarize,
};
use failscope_cache::{CacheKey, CacheLimits, CacheStats, QueryCache};
use failscope_config::FailscopeConfig;
use failscope_core::{FilterOptions, FilterSet, GroupBy, Issue, ScopeId, SortBy};
use serde::Serialize;

use crate::{
    CrossTabQuery, FailureRateQuery, FetchOptions, FrMatrix, FrMatrixQuery, QueryError,
    RecordSource, SampleSizeQuery, SummaryQuery,
};

const RATE_PREFIX: &str = "fr";
const CROSS_TAB_PREFIX: &str = "ct";
const SAMPLES_PREFIX: &str = "ss";
const SUMMARY_PREFIX: &str = "summary";
const OPTIONS_PREFIX: &str = "options";

/// Every result shape the service caches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CachedResult {
    Rate(GroupedFailureRate),
    CrossTab(CrossTab),
    Samples(SampleSizeByGroup),
    Summary(Box<Summary>),
    Options(FilterOptions),
}

/// Failure-rate queries over one record source, memoized per scope and request.
pub struct FailureRateService<S> {
    source: Arc<S>,
    cache: QueryCache<CachedResult, QueryError>,
    options: AnalysisOptions,
    exclude_resolved: bool,
}

impl<S> FailureRateService<S>
where
    S: RecordSource + 'static,
{
    pub fn new(source: Arc<S>, config: &FailscopeConfig) -> Self {
        let limits = CacheLimits {
            max_entries: config.cache.max_entries,
            max_bytes: config.cache.max_bytes,
            ttl: config.cache.ttl(),
            compute_timeout: config.cache.compute_timeout(),
        };
        let options = AnalysisOptions {
            default_limit: config.query.default_limit,
            max_limit: config.query.max_limit,
            default_top: config.query.default_top,
            max_top: config.query.max_top,
            test_fallback_applies_config_filter: config
                .analysis
                .test_fallback_applies_config_filter,
        };
        Self::with_parts(source, limits, options, config.query.exclude_resolved)
    }

    pub fn with_parts(
        source: Arc<S>,
        limits: CacheLimits,
        options: AnalysisOptions,
        exclude_resolved: bool,
    ) -> Self {
        Self {
            source,
            cache: QueryCache::new(limits),
            options,
            exclude_resolved,
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub async fn grouped_failure_rate(
        &self,
        scope: ScopeId,
        query: FailureRateQuery,
    ) -> Result<GroupedFailureRate, QueryError> {
        let query = query.validate()?;
        let key = CacheKey::for_params(RATE_PREFIX, scope, &query)?;
        let source = Arc::clone(&self.source);
        let options = self.options;
        let fetch = self.fetch_options();

        let result = self
            .cached(key.clone(), async move {
                let (records, index) = load(source.as_ref(), scope, &query.filters, fetch).await?;
                let request = AggregateRequest {
                    group_by: query.group_by,
                    numerator: query.numerator,
                    sort_by: query.sort_by,
                    offset: query.offset,
                    limit: query.limit,
                    keys: query.keys,
                };
                Ok(CachedResult::Rate(aggregate(
                    &records,
                    &index,
                    &query.filters,
                    &request,
                    &options,
                )))
            })
            .await?;

        match result {
            CachedResult::Rate(rate) => Ok(rate),
            _ => Err(shape_error(&key)),
        }
    }

    pub async fn cross_tabulation(
        &self,
        scope: ScopeId,
        query: CrossTabQuery,
    ) -> Result<CrossTab, QueryError> {
        let query = query.validate()?;
        let key = CacheKey::for_params(CROSS_TAB_PREFIX, scope, &query)?;
        let source = Arc::clone(&self.source);
        let options = self.options;
        let fetch = self.fetch_options();

        let result = self
            .cached(key.clone(), async move {
                let (records, index) = load(source.as_ref(), scope, &query.filters, fetch).await?;
                let request = CrossTabRequest {
                    dim1: query.dim1,
                    dim2: query.dim2,
                    top: query.top,
                    sort_by: query.sort_by,
                };
                let table = cross_tabulate(&records, &index, &query.filters, &request, &options)?;
                Ok(CachedResult::CrossTab(table))
            })
            .await?;

        match result {
            CachedResult::CrossTab(table) => Ok(table),
            _ => Err(shape_error(&key)),
        }
    }

    pub async fn sample_size_by_group(
        &self,
        scope: ScopeId,
        query: SampleSizeQuery,
    ) -> Result<SampleSizeByGroup, QueryError> {
        let query = query.validate()?;
        let key = CacheKey::for_params(SAMPLES_PREFIX, scope, &query)?;
        let source = Arc::clone(&self.source);
        let options = self.options;
        let fetch = self.fetch_options();

        let result = self
            .cached(key.clone(), async move {
                let (records, index) = load(source.as_ref(), scope, &query.filters, fetch).await?;
                let request = SampleSizeRequest {
                    group_by: query.group_by,
                    offset: query.offset,
                    limit: query.limit,
                    keys: query.keys,
                };
                let sizes =
                    sample_size_by_group(&records, &index, &query.filters, &request, &options)?;
                Ok(CachedResult::Samples(sizes))
            })
            .await?;

        match result {
            CachedResult::Samples(sizes) => Ok(sizes),
            _ => Err(shape_error(&key)),
        }
    }

    /// Dashboard summary. Resolved issues are always fetched for the status breakdown;
    /// the rest of the summary counts them only when resolved exclusion is off.
    pub async fn summary(&self, scope: ScopeId, query: SummaryQuery) -> Result<Summary, QueryError> {
        let key = CacheKey::for_params(SUMMARY_PREFIX, scope, &query)?;
        let source = Arc::clone(&self.source);
        let options = self.options;
        let include_resolved = !self.exclude_resolved;
        let fetch = FetchOptions {
            exclude_resolved: false,
        };

        let result = self
            .cached(key.clone(), async move {
                let (records, index) = load(source.as_ref(), scope, &query.filters, fetch).await?;
                let request = SummaryRequest {
                    numerator: query.numerator,
                    sort_by: query.sort_by,
                    top: query.top,
                    trend: query.trend,
                    include_resolved,
                };
                let summary = summarize(&records, &index, &query.filters, &request, &options);
                Ok(CachedResult::Summary(Box::new(summary)))
            })
            .await?;

        match result {
            CachedResult::Summary(summary) => Ok(*summary),
            _ => Err(shape_error(&key)),
        }
    }

    pub async fn filter_options(
        &self,
        scope: ScopeId,
        filters: FilterSet,
    ) -> Result<FilterOptions, QueryError> {
        let key = CacheKey::for_params(OPTIONS_PREFIX, scope, &filters)?;
        let source = Arc::clone(&self.source);

        let result = self
            .cached(key.clone(), async move {
                let options = source.filter_options(scope, &filters).await?;
                Ok(CachedResult::Options(options))
            })
            .await?;

        match result {
            CachedResult::Options(options) => Ok(options),
            _ => Err(shape_error(&key)),
        }
    }

    /// Config failure rates side by side for several scopes. Each scope is queried with
    /// the same fixed config keys so rows line up.
    pub async fn failure_rate_matrix(
        &self,
        scopes: &[ScopeId],
        query: FrMatrixQuery,
    ) -> Result<FrMatrix, QueryError> {
        let Some(&first) = scopes.first() else {
            return Err(QueryError::InvalidRequest(
                "failure rate matrix needs at least one scope".to_owned(),
            ));
        };

        let requested: Vec<String> = query
            .configs
            .unwrap_or_default()
            .into_iter()
            .map(|config| config.trim().to_owned())
            .filter(|config| !config.is_empty())
            .collect();
        let configs = if !requested.is_empty() {
            requested
        } else {
            let paged = self
                .grouped_failure_rate(
                    first,
                    FailureRateQuery {
                        group_by: GroupBy::Config,
                        numerator: query.numerator,
                        sort_by: SortBy::Key,
                        filters: query.filters.clone(),
                        offset: query.offset,
                        limit: query.limit,
                        keys: None,
                    },
                )
                .await?;
            paged
                .rows()
                .into_iter()
                .map(|(key, _, _)| key.to_owned())
                .collect()
        };

        if configs.is_empty() {
            return Ok(FrMatrix {
                scopes: scopes.to_vec(),
                configs,
                rows: Vec::new(),
            });
        }

        let mut rows = Vec::with_capacity(scopes.len() * configs.len());
        for (scope_index, scope) in scopes.iter().enumerate() {
            let rates = self
                .grouped_failure_rate(
                    *scope,
                    FailureRateQuery {
                        group_by: GroupBy::Config,
                        numerator: query.numerator,
                        sort_by: SortBy::Key,
                        filters: query.filters.clone(),
                        offset: 0,
                        limit: None,
                        keys: Some(configs.clone()),
                    },
                )
                .await?;
            for (config_index, (_, failures, total_samples)) in rates.rows().into_iter().enumerate()
            {
                rows.push([
                    scope_index as u64,
                    config_index as u64,
                    failures,
                    total_samples,
                ]);
            }
        }

        Ok(FrMatrix {
            scopes: scopes.to_vec(),
            configs,
            rows,
        })
    }

    pub fn invalidate_scope(&self, scope: ScopeId) -> usize {
        self.cache.invalidate_scope(scope)
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            exclude_resolved: self.exclude_resolved,
        }
    }

    async fn cached<Fut>(&self, key: CacheKey, compute: Fut) -> Result<CachedResult, QueryError>
    where
        Fut: Future<Output = Result<CachedResult, QueryError>> + Send + 'static,
    {
        Ok(self.cache.get_or_fetch(key, None, move || compute).await?)
    }
}

/// Issues and the station index for one request, fetched concurrently.
async fn load<S: RecordSource + ?Sized>(
    source: &S,
    scope: ScopeId,
    filters: &FilterSet,
    fetch: FetchOptions,
) -> Result<(Vec<Issue>, StationIndex), QueryError> {
    let (records, rows) = tokio::try_join!(
        source.fetch_issues(scope, filters, fetch),
        source.fetch_sample_sizes(scope)
    )?;
    tracing::debug!(
        scope,
        issues = records.len(),
        stations = rows.len(),
        "loaded records for failure-rate query"
    );
    Ok((records, StationIndex::build(&rows)))
}

fn shape_error(key: &CacheKey) -> QueryError {
    QueryError::CacheShape {
        key: key.to_string(),
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use failscope_analysis::AnalysisOptions;
use failscope_cache::CacheLimits;
use failscope_config::FailscopeConfig;
use failscope_core::{
    Dimension, FilterOptions, FilterSet, GroupBy, Issue, Numerator, SampleSizeRow, ScopeId,
    TestDescriptor,
};
use failscope_query::{
    CrossTabQuery, FailureRateQuery, FailureRateService, FetchOptions, FrMatrixQuery,
    InMemorySource, QueryError, RecordSource, SampleSizeQuery, StoreSource, SummaryQuery,
};
use failscope_store::{SqliteStore, Store};
use tempfile::tempdir;

fn row(station: &str, configs: &[(&str, u64)], tests: &[&str]) -> SampleSizeRow {
    SampleSizeRow {
        station: station.to_owned(),
        tests: tests
            .iter()
            .map(|name| TestDescriptor {
                test_id: None,
                test_name: (*name).to_owned(),
            })
            .collect(),
        config_samples: configs
            .iter()
            .map(|(name, count)| ((*name).to_owned(), *count))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn issue(fa: &str, sn: &str, station: &str, config: &str, test: &str, kind: &str) -> Issue {
    Issue {
        fa_number: fa.to_owned(),
        serial_number: Some(sn.to_owned()),
        station: Some(station.to_owned()),
        config: Some(config.to_owned()),
        failed_test: Some(test.to_owned()),
        failure_type: Some(kind.to_owned()),
        ..Issue::default()
    }
}

fn scenario_rows() -> Vec<SampleSizeRow> {
    vec![
        row("1", &[("CFG_A", 10), ("CFG_B", 5)], &["Alpha"]),
        row("2", &[("CFG_A", 20)], &["Beta"]),
    ]
}

fn scenario_issues() -> Vec<Issue> {
    vec![
        issue("FA-1", "SN-1", "1", "CFG_A", "Alpha", "Spec."),
        issue("FA-2", "SN-1", "1", "CFG_A", "Alpha", "Spec."),
        issue("FA-3", "SN-2", "1", "CFG_B", "Alpha", "Strife"),
        Issue {
            fa_status: Some("retest pass".to_owned()),
            ..issue("FA-4", "SN-3", "2", "CFG_A", "Beta", "Spec.")
        },
    ]
}

fn seeded_source(scopes: &[ScopeId]) -> InMemorySource {
    let source = InMemorySource::new();
    for scope in scopes {
        source.set_issues(*scope, scenario_issues());
        source.set_sample_sizes(*scope, scenario_rows());
    }
    source
}

/// Wraps a source and counts how often issues are fetched.
struct CountingSource {
    inner: InMemorySource,
    issue_fetches: AtomicUsize,
    fail: AtomicBool,
}

impl CountingSource {
    fn new(inner: InMemorySource) -> Self {
        Self {
            inner,
            issue_fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    fn fetches(&self) -> usize {
        self.issue_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for CountingSource {
    async fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        options: FetchOptions,
    ) -> Result<Vec<Issue>, QueryError> {
        self.issue_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueryError::Task("source unavailable".to_owned()));
        }
        self.inner.fetch_issues(scope, filters, options).await
    }

    async fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, QueryError> {
        self.inner.fetch_sample_sizes(scope).await
    }

    async fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, QueryError> {
        self.inner.filter_options(scope, filters).await
    }
}

fn service<S: RecordSource + 'static>(source: Arc<S>) -> FailureRateService<S> {
    FailureRateService::new(source, &FailscopeConfig::default())
}

fn by(group_by: GroupBy) -> FailureRateQuery {
    FailureRateQuery {
        group_by,
        numerator: Numerator::Spec,
        ..FailureRateQuery::default()
    }
}

#[tokio::test]
async fn config_and_overall_rates_skip_resolved_issues() {
    let service = service(Arc::new(seeded_source(&[1])));

    let by_config = service
        .grouped_failure_rate(1, by(GroupBy::Config))
        .await
        .expect("config rates");
    assert_eq!(by_config.row("CFG_A"), Some((1, 30)));
    assert_eq!(by_config.row("CFG_B"), Some((0, 5)));

    let overall = service
        .grouped_failure_rate(1, by(GroupBy::None))
        .await
        .expect("overall rate");
    assert_eq!(overall.row(""), Some((1, 35)));
}

#[tokio::test]
async fn test_populations_follow_the_stations_running_each_test() {
    let service = service(Arc::new(seeded_source(&[1])));

    let by_test = service
        .grouped_failure_rate(1, by(GroupBy::Test))
        .await
        .expect("test rates");
    assert_eq!(by_test.row("Alpha").map(|(_, samples)| samples), Some(15));
    assert_eq!(by_test.row("Beta").map(|(_, samples)| samples), Some(20));

    let sizes = service
        .sample_size_by_group(1, SampleSizeQuery::new(Dimension::Test))
        .await
        .expect("sample sizes");
    assert_eq!(sizes.keys, vec!["Alpha", "Beta"]);
    assert_eq!(sizes.total_samples, vec![15, 20]);
}

#[tokio::test]
async fn repeated_queries_are_served_from_cache_until_invalidated() {
    let source = Arc::new(CountingSource::new(seeded_source(&[1, 2])));
    let service = service(Arc::clone(&source));

    let first = service
        .grouped_failure_rate(1, by(GroupBy::Config))
        .await
        .expect("first");
    let second = service
        .grouped_failure_rate(1, by(GroupBy::Config))
        .await
        .expect("second");
    assert_eq!(first, second);
    assert_eq!(source.fetches(), 1);

    service
        .grouped_failure_rate(2, by(GroupBy::Config))
        .await
        .expect("other scope");
    assert_eq!(source.fetches(), 2);

    assert_eq!(service.invalidate_scope(1), 1);
    service
        .grouped_failure_rate(1, by(GroupBy::Config))
        .await
        .expect("after invalidation");
    service
        .grouped_failure_rate(2, by(GroupBy::Config))
        .await
        .expect("untouched scope");
    assert_eq!(source.fetches(), 3);
}

#[tokio::test]
async fn concurrent_identical_queries_share_one_fetch() {
    let source = Arc::new(CountingSource::new(seeded_source(&[1])));
    let service = service(Arc::clone(&source));

    let (left, right) = tokio::join!(
        service.cross_tabulation(1, CrossTabQuery::new(Dimension::Config, Dimension::Station)),
        service.cross_tabulation(1, CrossTabQuery::new(Dimension::Config, Dimension::Station)),
    );

    assert_eq!(left.expect("left"), right.expect("right"));
    assert_eq!(source.fetches(), 1);
    assert_eq!(service.cache_stats().in_flight, 0);
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_any_fetch() {
    let source = Arc::new(CountingSource::new(seeded_source(&[1])));
    let service = service(Arc::clone(&source));

    let err = service
        .cross_tabulation(1, CrossTabQuery::new(Dimension::Test, Dimension::Test))
        .await
        .expect_err("identical dimensions");
    assert!(err.is_invalid_request());

    let err = service
        .sample_size_by_group(1, SampleSizeQuery::new(Dimension::Symptom))
        .await
        .expect_err("symptom population");
    assert!(err.is_invalid_request());

    assert_eq!(source.fetches(), 0);
}

#[tokio::test]
async fn source_failures_propagate_and_are_not_cached() {
    let source = Arc::new(CountingSource::new(seeded_source(&[1])));
    let service = service(Arc::clone(&source));
    source.fail.store(true, Ordering::SeqCst);

    let err = service
        .grouped_failure_rate(1, by(GroupBy::Station))
        .await
        .expect_err("source is down");
    assert!(matches!(err.root(), QueryError::Task(message) if message == "source unavailable"));
    let stats = service.cache_stats();
    assert_eq!((stats.entries, stats.in_flight), (0, 0));

    source.fail.store(false, Ordering::SeqCst);
    let recovered = service
        .grouped_failure_rate(1, by(GroupBy::Station))
        .await
        .expect("recovered");
    assert_eq!(recovered.row("1").map(|(_, samples)| samples), Some(15));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn summary_counts_resolved_issues_only_in_the_status_breakdown() {
    let service = service(Arc::new(seeded_source(&[1])));

    let summary = service
        .summary(1, SummaryQuery::default())
        .await
        .expect("summary");
    assert_eq!(summary.overview.total_issues, 3);
    let resolved: u64 = summary
        .status_breakdown
        .iter()
        .filter(|status| status.status == "retest pass")
        .map(|status| status.count)
        .sum();
    assert_eq!(resolved, 1);
}

#[tokio::test]
async fn summary_counts_resolved_issues_when_exclusion_is_off() {
    let service = FailureRateService::with_parts(
        Arc::new(seeded_source(&[1])),
        CacheLimits::default(),
        AnalysisOptions::default(),
        false,
    );

    let summary = service
        .summary(1, SummaryQuery::default())
        .await
        .expect("summary");
    assert_eq!(summary.overview.total_issues, 4);
    assert_eq!(summary.overview.spec_units, 2);
}

#[tokio::test]
async fn matrix_lines_up_config_rates_across_scopes() {
    let source = seeded_source(&[1]);
    source.set_sample_sizes(2, scenario_rows());
    let service = service(Arc::new(source));

    let matrix = service
        .failure_rate_matrix(&[1, 2], FrMatrixQuery::default())
        .await
        .expect("matrix");

    assert_eq!(matrix.configs, vec!["CFG_A", "CFG_B"]);
    assert_eq!(
        matrix.rows,
        vec![[0, 0, 1, 30], [0, 1, 0, 5], [1, 0, 0, 30], [1, 1, 0, 5]]
    );

    let err = service
        .failure_rate_matrix(&[], FrMatrixQuery::default())
        .await
        .expect_err("no scopes");
    assert!(err.is_invalid_request());
}

#[tokio::test]
async fn store_source_reads_scopes_from_sqlite() {
    let temp = tempdir().expect("tempdir");
    let store = SqliteStore::open(temp.path()).expect("open store");
    let scope = store.create_scope("build-7").expect("create scope");
    store
        .insert_issues(scope, &scenario_issues())
        .expect("insert issues");
    store
        .replace_sample_sizes(scope, &scenario_rows())
        .expect("insert sample sizes");

    let service = FailureRateService::with_parts(
        Arc::new(StoreSource::new(store)),
        CacheLimits::default(),
        AnalysisOptions::default(),
        true,
    );

    let by_config = service
        .grouped_failure_rate(scope, by(GroupBy::Config))
        .await
        .expect("config rates");
    assert_eq!(by_config.row("CFG_A"), Some((1, 30)));

    let options = service
        .filter_options(scope, FilterSet::default())
        .await
        .expect("filter options");
    assert_eq!(
        options.get(failscope_core::FilterField::Station),
        ["1", "2"]
    );
}

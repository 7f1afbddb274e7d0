mod aggregate;
mod crosstab;
mod denominator;
mod sample_index;
mod samples;
mod summary;
mod target;

pub use aggregate::{AggregateRequest, GroupedBody, GroupedFailureRate, aggregate};
pub use crosstab::{CellSortBy, CrossTab, CrossTabCell, CrossTabRequest, cross_tabulate};
pub use denominator::{Denominator, DenominatorResolver};
pub use sample_index::{StationIndex, StationSamples};
pub use samples::{SampleSizeByGroup, SampleSizeRequest, sample_size_by_group};
pub use summary::{
    Overview, StatusCount, Summary, SummaryRequest, TrendBucket, TrendGranularity, TrendSeries,
    summarize,
};
pub use target::select_target_stations;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Knobs shared by every computation, resolved from workspace config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub default_limit: usize,
    pub max_limit: usize,
    pub default_top: usize,
    pub max_top: usize,
    pub test_fallback_applies_config_filter: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
            default_top: 200,
            max_top: 2000,
            test_fallback_applies_config_filter: true,
        }
    }
}

impl AnalysisOptions {
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }

    pub fn effective_top(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top)
            .clamp(1, self.max_top.max(1))
    }
}

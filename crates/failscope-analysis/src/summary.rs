use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Days, NaiveDate};
use failscope_core::{
    Dimension, FailureCategory, FilterSet, Issue, Numerator, SortBy, ppm,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::UnitCounter;
use crate::{
    AggregateRequest, AnalysisOptions, DenominatorResolver, GroupedFailureRate, StationIndex,
    aggregate, select_target_stations,
};

pub const DEFAULT_DISTRIBUTION_TOP: usize = 10;

const DAY_BUCKET_MAX_SPAN_DAYS: i64 = 7;
const WEEK_BUCKET_MAX_SPAN_DAYS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SummaryRequest {
    #[serde(default)]
    pub numerator: Numerator,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub top: Option<usize>,
    #[serde(default)]
    pub trend: bool,
    /// Count resolved issues in the overview, distributions and trend as well.
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_issues: u64,
    pub spec_count: u64,
    pub strife_count: u64,
    pub spec_units: u64,
    pub strife_units: u64,
    pub station_count: u64,
    pub config_count: u64,
    pub symptom_count: u64,
    pub total_samples: u64,
    pub spec_ppm: u64,
    pub strife_ppm: u64,
    pub overall_ppm: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendGranularity {
    Day,
    Week,
    Month,
}

impl TrendGranularity {
    /// Day buckets up to a week, week buckets up to two months, months beyond.
    pub fn for_span(from: NaiveDate, to: NaiveDate) -> Self {
        let span = (to - from).num_days();
        if span <= DAY_BUCKET_MAX_SPAN_DAYS {
            Self::Day
        } else if span <= WEEK_BUCKET_MAX_SPAN_DAYS {
            Self::Week
        } else {
            Self::Month
        }
    }

    fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Self::Day => date,
            Self::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_sunday())))
                .unwrap_or(date),
            Self::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn next(self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Day => start.checked_add_days(Days::new(1)),
            Self::Week => start.checked_add_days(Days::new(7)),
            Self::Month => {
                let (year, month) = if start.month() == 12 {
                    (start.year() + 1, 1)
                } else {
                    (start.year(), start.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        }
    }

    fn label(self, start: NaiveDate) -> String {
        match self {
            Self::Day | Self::Week => start.format("%Y-%m-%d").to_string(),
            Self::Month => start.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendBucket {
    pub period: String,
    pub total: u64,
    pub spec_units: u64,
    pub strife_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub granularity: TrendGranularity,
    pub buckets: Vec<TrendBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub overview: Overview,
    pub distributions: BTreeMap<Dimension, GroupedFailureRate>,
    pub status_breakdown: Vec<StatusCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendSeries>,
}

/// Dashboard bundle for one scope. `all_records` includes resolved issues; unless
/// `include_resolved` is set they only feed the status breakdown.
pub fn summarize(
    all_records: &[Issue],
    index: &StationIndex,
    filters: &FilterSet,
    request: &SummaryRequest,
    options: &AnalysisOptions,
) -> Summary {
    let open: Vec<Issue> = all_records
        .iter()
        .filter(|issue| request.include_resolved || !issue.is_resolved())
        .cloned()
        .collect();

    let overview = overview(&open, index, filters, options);

    let top = request.top.unwrap_or(DEFAULT_DISTRIBUTION_TOP);
    let distributions = Dimension::ALL
        .into_iter()
        .map(|dimension| {
            let grouped = aggregate(
                &open,
                index,
                filters,
                &AggregateRequest {
                    group_by: dimension.into(),
                    numerator: request.numerator,
                    sort_by: request.sort_by,
                    offset: 0,
                    limit: Some(top),
                    keys: None,
                },
                options,
            );
            (dimension, grouped)
        })
        .collect();

    let trend = match (request.trend, filters.date_from, filters.date_to) {
        (true, Some(from), Some(to)) if from <= to => Some(trend(&open, from, to)),
        _ => None,
    };

    Summary {
        overview,
        distributions,
        status_breakdown: status_breakdown(all_records),
        trend,
    }
}

fn overview(
    open: &[Issue],
    index: &StationIndex,
    filters: &FilterSet,
    options: &AnalysisOptions,
) -> Overview {
    let mut units = UnitCounter::default();
    let mut spec_count = 0;
    let mut strife_count = 0;
    let mut configs = HashSet::new();
    let mut symptoms = HashSet::new();

    for issue in open {
        units.record(issue);
        match issue.category() {
            FailureCategory::Spec => spec_count += 1,
            FailureCategory::Strife => strife_count += 1,
            FailureCategory::Other => {}
        }
        if let Some(config) = issue.dimension_value(Dimension::Config) {
            configs.insert(config);
        }
        if let Some(symptom) = issue.dimension_value(Dimension::Symptom) {
            symptoms.insert(symptom);
        }
    }

    let total_samples = DenominatorResolver::new(index, options).total(filters);
    let station_count = select_target_stations(index, filters).len() as u64;

    Overview {
        total_issues: open.len() as u64,
        spec_count,
        strife_count,
        spec_units: units.spec(),
        strife_units: units.strife(),
        station_count,
        config_count: configs.len() as u64,
        symptom_count: symptoms.len() as u64,
        total_samples,
        spec_ppm: ppm(units.spec(), total_samples),
        strife_ppm: ppm(units.strife(), total_samples),
        overall_ppm: ppm(units.count(Numerator::Both), total_samples),
    }
}

fn status_breakdown(records: &[Issue]) -> Vec<StatusCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for issue in records {
        let status = issue
            .fa_status
            .as_deref()
            .map(str::trim)
            .filter(|status| !status.is_empty())
            .unwrap_or("unknown");
        *counts.entry(status).or_insert(0) += 1;
    }

    let mut breakdown: Vec<StatusCount> = counts
        .into_iter()
        .map(|(status, count)| StatusCount {
            status: status.to_owned(),
            count,
        })
        .collect();
    breakdown.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.status.cmp(&right.status))
    });
    breakdown
}

fn trend(open: &[Issue], from: NaiveDate, to: NaiveDate) -> TrendSeries {
    let granularity = TrendGranularity::for_span(from, to);

    let mut periods: Vec<NaiveDate> = Vec::new();
    let mut cursor = Some(granularity.bucket_start(from));
    while let Some(start) = cursor.filter(|start| *start <= to) {
        periods.push(start);
        cursor = granularity.next(start);
    }

    let mut buckets: BTreeMap<NaiveDate, (u64, UnitCounter<'_>)> = periods
        .iter()
        .map(|start| (*start, (0, UnitCounter::default())))
        .collect();
    for issue in open {
        let Some(date) = issue.open_date.filter(|date| *date >= from && *date <= to) else {
            continue;
        };
        if let Some((total, units)) = buckets.get_mut(&granularity.bucket_start(date)) {
            *total += 1;
            units.record(issue);
        }
    }

    TrendSeries {
        granularity,
        buckets: buckets
            .into_iter()
            .map(|(start, (total, units))| TrendBucket {
                period: granularity.label(start),
                total,
                spec_units: units.spec(),
                strife_units: units.strife(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GroupedBody;
    use crate::fixtures::{issue, scenario_a_open_issues, scenario_a_rows};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn scenario_a_all_issues() -> Vec<Issue> {
        let mut records = scenario_a_open_issues();
        let mut resolved = issue("FA-4", "SN-3", "2", "CFG_A", "Beta", "Spec.");
        resolved.fa_status = Some("retest pass".to_owned());
        records.push(resolved);
        records
    }

    #[test]
    fn overview_counts_open_issues_and_rates() {
        let index = StationIndex::build(&scenario_a_rows());
        let summary = summarize(
            &scenario_a_all_issues(),
            &index,
            &FilterSet::default(),
            &SummaryRequest::default(),
            &AnalysisOptions::default(),
        );

        let overview = &summary.overview;
        assert_eq!(overview.total_issues, 3);
        assert_eq!((overview.spec_count, overview.strife_count), (2, 1));
        assert_eq!((overview.spec_units, overview.strife_units), (1, 1));
        assert_eq!(overview.total_samples, 35);
        assert_eq!(overview.station_count, 2);
        assert_eq!(overview.spec_ppm, 28_571);
        assert_eq!(overview.overall_ppm, 57_143);
    }

    #[test]
    fn included_resolved_issues_count_toward_the_overview() {
        let index = StationIndex::build(&scenario_a_rows());
        let summary = summarize(
            &scenario_a_all_issues(),
            &index,
            &FilterSet::default(),
            &SummaryRequest {
                include_resolved: true,
                ..SummaryRequest::default()
            },
            &AnalysisOptions::default(),
        );

        let overview = &summary.overview;
        assert_eq!(overview.total_issues, 4);
        assert_eq!((overview.spec_count, overview.spec_units), (3, 2));
        assert_eq!(summary.status_breakdown.len(), 2);
    }

    #[test]
    fn distributions_cover_every_dimension_and_status_breakdown_includes_resolved() {
        let index = StationIndex::build(&scenario_a_rows());
        let summary = summarize(
            &scenario_a_all_issues(),
            &index,
            &FilterSet::default(),
            &SummaryRequest {
                top: Some(1),
                ..SummaryRequest::default()
            },
            &AnalysisOptions::default(),
        );

        assert_eq!(summary.distributions.len(), 5);
        let configs = &summary.distributions[&Dimension::Config];
        let GroupedBody::Grouped {
            keys, total_keys, ..
        } = &configs.body
        else {
            panic!("expected grouped config distribution");
        };
        assert_eq!(keys, &["CFG_A"]);
        assert_eq!(*total_keys, 2);

        assert_eq!(
            summary.status_breakdown,
            vec![
                StatusCount {
                    status: "unknown".to_owned(),
                    count: 3
                },
                StatusCount {
                    status: "retest pass".to_owned(),
                    count: 1
                },
            ]
        );
        assert!(summary.trend.is_none());
    }

    #[test]
    fn granularity_follows_the_requested_span() {
        assert_eq!(
            TrendGranularity::for_span(date(2024, 1, 1), date(2024, 1, 8)),
            TrendGranularity::Day
        );
        assert_eq!(
            TrendGranularity::for_span(date(2024, 1, 1), date(2024, 3, 1)),
            TrendGranularity::Week
        );
        assert_eq!(
            TrendGranularity::for_span(date(2024, 1, 1), date(2024, 3, 2)),
            TrendGranularity::Month
        );
    }

    #[test]
    fn weekly_trend_buckets_start_on_sunday_and_include_empty_weeks() {
        let mut first = issue("FA-1", "SN-1", "1", "C", "T", "Spec");
        first.open_date = Some(date(2024, 5, 1));
        let mut second = issue("FA-2", "SN-1", "1", "C", "T", "Spec");
        second.open_date = Some(date(2024, 5, 3));
        let mut third = issue("FA-3", "SN-2", "1", "C", "T", "Strife");
        third.open_date = Some(date(2024, 5, 20));

        let filters = FilterSet {
            date_from: Some(date(2024, 5, 1)),
            date_to: Some(date(2024, 5, 21)),
            ..FilterSet::default()
        };
        let summary = summarize(
            &[first, second, third],
            &StationIndex::default(),
            &filters,
            &SummaryRequest {
                trend: true,
                ..SummaryRequest::default()
            },
            &AnalysisOptions::default(),
        );

        let trend = summary.trend.expect("trend requested");
        assert_eq!(trend.granularity, TrendGranularity::Week);
        let periods = trend
            .buckets
            .iter()
            .map(|bucket| bucket.period.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            periods,
            ["2024-04-28", "2024-05-05", "2024-05-12", "2024-05-19"]
        );
        assert_eq!(trend.buckets[0].total, 2);
        assert_eq!(trend.buckets[0].spec_units, 1);
        assert_eq!(trend.buckets[1].total, 0);
        assert_eq!(trend.buckets[3].strife_units, 1);
    }
}

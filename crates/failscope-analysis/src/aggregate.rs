use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use failscope_core::{Dimension, FailureCategory, FilterSet, GroupBy, Issue, Numerator, SortBy};
use serde::{Deserialize, Serialize};

use crate::{AnalysisOptions, Denominator, DenominatorResolver, StationIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AggregateRequest {
    pub group_by: GroupBy,
    pub numerator: Numerator,
    pub sort_by: SortBy,
    pub offset: usize,
    pub limit: Option<usize>,
    /// Fixed key order; disables sorting and paging.
    pub keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedFailureRate {
    pub group_by: GroupBy,
    pub numerator: Numerator,
    pub sort_by: SortBy,
    #[serde(flatten)]
    pub body: GroupedBody,
}

/// Columnar payload: `keys[i]`, `failures[i]` and `total_samples[i]` describe one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupedBody {
    Grouped {
        keys: Vec<String>,
        failures: Vec<u64>,
        #[serde(rename = "totalSamples")]
        total_samples: Vec<u64>,
        offset: usize,
        limit: usize,
        #[serde(rename = "totalKeys")]
        total_keys: usize,
    },
    Overall {
        failures: u64,
        #[serde(rename = "totalSamples")]
        total_samples: u64,
    },
}

impl GroupedFailureRate {
    /// `(key, failures, total_samples)` rows; a single unnamed row for ungrouped results.
    pub fn rows(&self) -> Vec<(&str, u64, u64)> {
        match &self.body {
            GroupedBody::Grouped {
                keys,
                failures,
                total_samples,
                ..
            } => keys
                .iter()
                .zip(failures)
                .zip(total_samples)
                .map(|((key, failures), samples)| (key.as_str(), *failures, *samples))
                .collect(),
            GroupedBody::Overall {
                failures,
                total_samples,
            } => vec![("", *failures, *total_samples)],
        }
    }

    pub fn row(&self, key: &str) -> Option<(u64, u64)> {
        self.rows()
            .into_iter()
            .find(|(candidate, _, _)| *candidate == key)
            .map(|(_, failures, samples)| (failures, samples))
    }
}

/// Distinct failing units per category.
#[derive(Debug, Default)]
pub(crate) struct UnitCounter<'a> {
    spec: HashSet<&'a str>,
    strife: HashSet<&'a str>,
}

impl<'a> UnitCounter<'a> {
    pub(crate) fn record(&mut self, issue: &'a Issue) {
        let Some(key) = issue.dedup_key() else {
            return;
        };
        match issue.category() {
            FailureCategory::Spec => {
                self.spec.insert(key);
            }
            FailureCategory::Strife => {
                self.strife.insert(key);
            }
            FailureCategory::Other => {}
        }
    }

    pub(crate) fn spec(&self) -> u64 {
        self.spec.len() as u64
    }

    pub(crate) fn strife(&self) -> u64 {
        self.strife.len() as u64
    }

    pub(crate) fn count(&self, numerator: Numerator) -> u64 {
        match numerator {
            Numerator::Spec => self.spec(),
            Numerator::Strife => self.strife(),
            Numerator::Both => self.spec() + self.strife(),
        }
    }
}

pub fn aggregate(
    records: &[Issue],
    index: &StationIndex,
    filters: &FilterSet,
    request: &AggregateRequest,
    options: &AnalysisOptions,
) -> GroupedFailureRate {
    let resolver = DenominatorResolver::new(index, options);
    let denominator = resolver.resolve(request.group_by, filters, records);

    let body = match request.group_by.dimension() {
        None => {
            let mut counter = UnitCounter::default();
            records.iter().for_each(|issue| counter.record(issue));
            GroupedBody::Overall {
                failures: counter.count(request.numerator),
                total_samples: denominator.get(""),
            }
        }
        Some(dimension) => grouped(records, dimension, &denominator, request, options),
    };

    GroupedFailureRate {
        group_by: request.group_by,
        numerator: request.numerator,
        sort_by: request.sort_by,
        body,
    }
}

fn grouped(
    records: &[Issue],
    dimension: Dimension,
    denominator: &Denominator,
    request: &AggregateRequest,
    options: &AnalysisOptions,
) -> GroupedBody {
    let mut counters: HashMap<&str, UnitCounter<'_>> = HashMap::new();
    for issue in records {
        if let Some(value) = issue.dimension_value(dimension) {
            counters.entry(value).or_default().record(issue);
        }
    }
    let failures_of = |key: &str| {
        counters
            .get(key)
            .map(|counter| counter.count(request.numerator))
            .unwrap_or(0)
    };

    if let Some(keys) = &request.keys {
        let keys: Vec<String> = keys.iter().map(|key| key.trim().to_owned()).collect();
        return GroupedBody::Grouped {
            failures: keys.iter().map(|key| failures_of(key)).collect(),
            total_samples: keys.iter().map(|key| denominator.get(key)).collect(),
            offset: 0,
            limit: keys.len(),
            total_keys: keys.len(),
            keys,
        };
    }

    let candidates: BTreeSet<&str> = counters
        .keys()
        .copied()
        .chain(denominator.keys())
        .collect();
    let mut rows: Vec<(&str, u64, u64)> = candidates
        .into_iter()
        .map(|key| (key, failures_of(key), denominator.get(key)))
        .collect();

    rows.sort_by(|left, right| {
        let by_key = || left.0.cmp(right.0);
        match request.sort_by {
            SortBy::Key => by_key(),
            SortBy::Failures => right.1.cmp(&left.1).then_with(by_key),
            SortBy::Ppm => rate(right.1, right.2)
                .partial_cmp(&rate(left.1, left.2))
                .unwrap_or(Ordering::Equal)
                .then_with(|| right.1.cmp(&left.1))
                .then_with(by_key),
        }
    });

    let total_keys = rows.len();
    let limit = options.effective_limit(request.limit);
    let offset = request.offset.min(total_keys);
    let page: Vec<(&str, u64, u64)> = rows.into_iter().skip(offset).take(limit).collect();

    GroupedBody::Grouped {
        keys: page.iter().map(|(key, _, _)| (*key).to_owned()).collect(),
        failures: page.iter().map(|(_, failures, _)| *failures).collect(),
        total_samples: page.iter().map(|(_, _, samples)| *samples).collect(),
        offset,
        limit,
        total_keys,
    }
}

/// Failure rate used for ordering; groups without a population sort last.
fn rate(failures: u64, samples: u64) -> f64 {
    if samples == 0 {
        -1.0
    } else {
        failures as f64 / samples as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{issue, row, scenario_a_open_issues, scenario_a_rows};

    fn request(group_by: GroupBy) -> AggregateRequest {
        AggregateRequest {
            group_by,
            ..AggregateRequest::default()
        }
    }

    #[test]
    fn scenario_a_config_and_overall_rates() {
        let index = StationIndex::build(&scenario_a_rows());
        let records = scenario_a_open_issues();
        let options = AnalysisOptions::default();

        let by_config = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &request(GroupBy::Config),
            &options,
        );
        assert_eq!(by_config.row("CFG_A"), Some((1, 30)));
        assert_eq!(by_config.row("CFG_B"), Some((0, 5)));

        let overall = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &request(GroupBy::None),
            &options,
        );
        assert_eq!(
            overall.body,
            GroupedBody::Overall {
                failures: 1,
                total_samples: 35
            }
        );
    }

    #[test]
    fn both_numerator_adds_distinct_spec_and_strife_units() {
        let index = StationIndex::build(&scenario_a_rows());
        let mut records = scenario_a_open_issues();
        records.push(issue("FA-5", "SN-1", "1", "CFG_A", "Alpha", "Strife"));

        let result = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &AggregateRequest {
                numerator: Numerator::Both,
                ..request(GroupBy::None)
            },
            &AnalysisOptions::default(),
        );
        assert_eq!(result.rows(), vec![("", 3, 35)]);
    }

    #[test]
    fn ppm_sort_puts_zero_population_last_and_breaks_ties_by_failures_then_key() {
        let index = StationIndex::build(&[
            row("1", &[("C1", 100)], &[]),
            row("2", &[("C1", 10)], &[]),
            row("3", &[("C1", 20)], &[]),
        ]);
        let records = vec![
            issue("FA-1", "SN-1", "1", "C1", "T", "Spec"),
            issue("FA-2", "SN-2", "2", "C1", "T", "Spec"),
            issue("FA-3", "SN-3", "3", "C1", "T", "Spec"),
            issue("FA-4", "SN-4", "3", "C1", "T", "Spec"),
            issue("FA-5", "SN-5", "9", "C1", "T", "Spec"),
        ];

        let result = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &request(GroupBy::Station),
            &AnalysisOptions::default(),
        );
        let order = result.rows().iter().map(|row| row.0).collect::<Vec<_>>();
        assert_eq!(order, vec!["3", "2", "1", "9"]);
    }

    #[test]
    fn key_sort_is_lexicographic_for_station_ids() {
        let index = StationIndex::build(&[
            row("10", &[("C1", 10)], &[]),
            row("9", &[("C1", 10)], &[]),
            row("2", &[("C1", 10)], &[]),
        ]);

        let result = aggregate(
            &[],
            &index,
            &FilterSet::default(),
            &AggregateRequest {
                sort_by: SortBy::Key,
                ..request(GroupBy::Station)
            },
            &AnalysisOptions::default(),
        );
        let order = result.rows().iter().map(|row| row.0).collect::<Vec<_>>();
        assert_eq!(order, vec!["10", "2", "9"]);
    }

    #[test]
    fn explicit_keys_keep_order_and_skip_paging() {
        let index = StationIndex::build(&scenario_a_rows());
        let records = scenario_a_open_issues();

        let result = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &AggregateRequest {
                keys: Some(vec!["CFG_B".to_owned(), "CFG_Z".to_owned(), "CFG_A".to_owned()]),
                offset: 7,
                limit: Some(1),
                ..request(GroupBy::Config)
            },
            &AnalysisOptions::default(),
        );

        let GroupedBody::Grouped {
            keys,
            failures,
            total_samples,
            offset,
            limit,
            ..
        } = &result.body
        else {
            panic!("expected grouped body");
        };
        assert_eq!(keys, &["CFG_B", "CFG_Z", "CFG_A"]);
        assert_eq!(failures, &[0, 0, 1]);
        assert_eq!(total_samples, &[5, 0, 30]);
        assert_eq!((*offset, *limit), (0, 3));
    }

    #[test]
    fn paging_reports_total_keys_and_uniform_samples_for_symptoms() {
        let index = StationIndex::build(&scenario_a_rows());
        let mut records = scenario_a_open_issues();
        for (n, symptom) in ["Rattle", "Buzz", "Noise"].iter().enumerate() {
            records[n].symptom = Some((*symptom).to_owned());
        }

        let result = aggregate(
            &records,
            &index,
            &FilterSet::default(),
            &AggregateRequest {
                sort_by: SortBy::Key,
                offset: 1,
                limit: Some(1),
                ..request(GroupBy::Symptom)
            },
            &AnalysisOptions::default(),
        );

        let GroupedBody::Grouped {
            keys,
            total_samples,
            total_keys,
            ..
        } = &result.body
        else {
            panic!("expected grouped body");
        };
        assert_eq!(keys, &["Noise"]);
        assert_eq!(total_samples, &[35]);
        assert_eq!(*total_keys, 3);
    }

    #[test]
    fn serialized_shape_is_columnar_camel_case() {
        let index = StationIndex::build(&scenario_a_rows());
        let result = aggregate(
            &scenario_a_open_issues(),
            &index,
            &FilterSet::default(),
            &AggregateRequest {
                sort_by: SortBy::Key,
                ..request(GroupBy::Station)
            },
            &AnalysisOptions::default(),
        );

        let rendered = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            rendered,
            serde_json::json!({
                "groupBy": "station",
                "numerator": "spec",
                "sortBy": "key",
                "keys": ["1", "2"],
                "failures": [1, 0],
                "totalSamples": [15, 20],
                "offset": 0,
                "limit": 50,
                "totalKeys": 2
            })
        );

        let overall = aggregate(
            &[],
            &StationIndex::default(),
            &FilterSet::default(),
            &request(GroupBy::None),
            &AnalysisOptions::default(),
        );
        assert_eq!(
            serde_json::to_value(&overall).expect("serialize overall"),
            serde_json::json!({
                "groupBy": "none",
                "numerator": "spec",
                "sortBy": "ppm",
                "failures": 0,
                "totalSamples": 0
            })
        );
    }
}

use std::collections::{BTreeMap, BTreeSet};

use failscope_core::{Dimension, FilterField, FilterSet, GroupBy, Issue, StationId};

use crate::{AnalysisOptions, StationIndex, select_target_stations};

/// Population a numerator is divided by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denominator {
    /// One population for an ungrouped query.
    Scalar(u64),
    /// The same population for every key (location, symptom).
    Uniform(u64),
    /// A population per key; keys absent from the map have none.
    PerValue(BTreeMap<String, u64>),
}

impl Denominator {
    pub fn get(&self, key: &str) -> u64 {
        match self {
            Self::Scalar(total) | Self::Uniform(total) => *total,
            Self::PerValue(values) => values.get(key).copied().unwrap_or(0),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            Self::PerValue(values) => Some(values),
            Self::Scalar(_) | Self::Uniform(_) => None,
        };
        values
            .into_iter()
            .flat_map(|values| values.keys().map(String::as_str))
    }
}

pub struct DenominatorResolver<'a> {
    index: &'a StationIndex,
    options: AnalysisOptions,
}

impl<'a> DenominatorResolver<'a> {
    pub fn new(index: &'a StationIndex, options: &AnalysisOptions) -> Self {
        Self {
            index,
            options: *options,
        }
    }

    pub fn resolve(&self, group_by: GroupBy, filters: &FilterSet, records: &[Issue]) -> Denominator {
        match group_by {
            GroupBy::None => Denominator::Scalar(self.total(filters)),
            GroupBy::Location | GroupBy::Symptom => Denominator::Uniform(self.total(filters)),
            GroupBy::Station => Denominator::PerValue(self.by_station(filters)),
            GroupBy::Config => Denominator::PerValue(self.by_config(filters)),
            GroupBy::Test => Denominator::PerValue(self.by_test(filters, records)),
        }
    }

    pub fn total(&self, filters: &FilterSet) -> u64 {
        let targets = select_target_stations(self.index, filters);
        self.index.samples_at(&targets, &filters.configs)
    }

    fn by_station(&self, filters: &FilterSet) -> BTreeMap<String, u64> {
        select_target_stations(self.index, filters)
            .into_iter()
            .map(|station| {
                let samples = self.index.samples_at([&station], &filters.configs);
                (station, samples)
            })
            .collect()
    }

    fn by_config(&self, filters: &FilterSet) -> BTreeMap<String, u64> {
        let wanted: BTreeSet<&str> = filters.configs.iter().map(|c| c.trim()).collect();
        let mut totals = BTreeMap::new();

        for station in select_target_stations(self.index, filters) {
            let Some(samples) = self.index.station(&station) else {
                continue;
            };
            for (config, count) in &samples.config_samples {
                if !wanted.is_empty() && !wanted.contains(config.as_str()) {
                    continue;
                }
                *totals.entry(config.clone()).or_insert(0) += *count;
            }
        }

        totals
    }

    fn by_test(&self, filters: &FilterSet, records: &[Issue]) -> BTreeMap<String, u64> {
        let mut candidates = BTreeSet::new();

        for name in self.index.test_names() {
            if !filters.tests.is_empty() && !filters.tests.iter().any(|test| test == name) {
                continue;
            }
            let scoped = filters.with_tests(vec![name.clone()]);
            if !select_target_stations(self.index, &scoped).is_empty() {
                candidates.insert(name.clone());
            }
        }
        for record in records {
            if let Some(test) = record.dimension_value(Dimension::Test) {
                candidates.insert(test.to_owned());
            }
        }

        candidates
            .into_iter()
            .map(|name| {
                let population = self.test_population(&name, filters, records);
                (name, population)
            })
            .collect()
    }

    /// Population of one test: its own stations, or the stations its failures were
    /// seen on when the sample-size table does not list it.
    pub fn test_population(&self, test: &str, filters: &FilterSet, records: &[Issue]) -> u64 {
        if self.index.stations_for_test(test).is_some() {
            let scoped = filters.with_tests(vec![test.to_owned()]);
            return self.total(&scoped);
        }

        let stations = inferred_stations(test, filters, records);
        let configs: &[String] = if self.options.test_fallback_applies_config_filter {
            &filters.configs
        } else {
            &[]
        };
        tracing::warn!(
            test,
            stations = stations.len(),
            "test missing from sample-size table, using stations observed on failures"
        );
        self.index.samples_at(&stations, configs)
    }

    /// Filters narrowed to one value of `dimension`, used for per-cell populations.
    /// `None` means the narrowed population is empty.
    pub fn narrowed(
        &self,
        dimension: Dimension,
        value: &str,
        filters: &FilterSet,
        records: &[Issue],
    ) -> Option<FilterSet> {
        match dimension {
            Dimension::Station => Some(filters.with_list(FilterField::Station, vec![value.to_owned()])),
            Dimension::Config => Some(filters.with_list(FilterField::Config, vec![value.to_owned()])),
            Dimension::Location | Dimension::Symptom => Some(filters.clone()),
            Dimension::Test => {
                if self.index.stations_for_test(value).is_some() {
                    return Some(filters.with_tests(vec![value.to_owned()]));
                }
                let stations = inferred_stations(value, filters, records);
                if stations.is_empty() {
                    return None;
                }
                let mut narrowed = filters
                    .with_tests(Vec::new())
                    .with_list(FilterField::Station, stations.into_iter().collect());
                if !self.options.test_fallback_applies_config_filter {
                    narrowed = narrowed.without(FilterField::Config);
                }
                Some(narrowed)
            }
        }
    }
}

/// Stations observed on failures of `test`, restricted by any station filter.
fn inferred_stations(test: &str, filters: &FilterSet, records: &[Issue]) -> BTreeSet<StationId> {
    let wanted: BTreeSet<&str> = filters.stations.iter().map(|s| s.trim()).collect();
    records
        .iter()
        .filter(|record| record.dimension_value(Dimension::Test) == Some(test))
        .filter_map(|record| record.dimension_value(Dimension::Station))
        .filter(|station| wanted.is_empty() || wanted.contains(station))
        .map(str::to_owned)
        .collect()
}

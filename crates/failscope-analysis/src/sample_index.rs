use std::collections::{BTreeMap, BTreeSet};

use failscope_core::{SampleSizeRow, StationId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSamples {
    pub tests: Vec<String>,
    pub config_samples: BTreeMap<String, u64>,
    total_samples: u64,
}

impl StationSamples {
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Samples contributed under a config filter; an empty filter means every config.
    pub fn samples_for(&self, configs: &[String]) -> u64 {
        if configs.is_empty() {
            return self.total_samples;
        }
        let wanted: BTreeSet<&str> = configs.iter().map(|config| config.trim()).collect();
        wanted
            .into_iter()
            .filter_map(|config| self.config_samples.get(config))
            .sum()
    }
}

/// Read-only view of one scope's sample-size table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StationIndex {
    stations: BTreeMap<StationId, StationSamples>,
    test_stations: BTreeMap<String, BTreeSet<StationId>>,
}

impl StationIndex {
    pub fn build(rows: &[SampleSizeRow]) -> Self {
        let mut stations = BTreeMap::new();

        for row in rows {
            let station = row.station.trim();
            if station.is_empty() {
                continue;
            }

            let mut config_samples = BTreeMap::new();
            for (config, count) in &row.config_samples {
                let config = config.trim();
                if config.is_empty() {
                    continue;
                }
                *config_samples.entry(config.to_owned()).or_insert(0) += *count;
            }

            let mut tests = Vec::new();
            for test in &row.tests {
                let name = test.test_name.trim();
                if !name.is_empty() && !tests.iter().any(|known| known == name) {
                    tests.push(name.to_owned());
                }
            }

            let total_samples = config_samples.values().sum();
            let replaced = stations.insert(
                station.to_owned(),
                StationSamples {
                    tests,
                    config_samples,
                    total_samples,
                },
            );
            if replaced.is_some() {
                tracing::debug!(station, "duplicate sample-size row, keeping the later one");
            }
        }

        let mut test_stations: BTreeMap<String, BTreeSet<StationId>> = BTreeMap::new();
        for (station, samples) in &stations {
            for test in &samples.tests {
                test_stations
                    .entry(test.clone())
                    .or_default()
                    .insert(station.clone());
            }
        }

        Self {
            stations,
            test_stations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn station(&self, station: &str) -> Option<&StationSamples> {
        self.stations.get(station.trim())
    }

    pub fn stations(&self) -> impl Iterator<Item = (&StationId, &StationSamples)> {
        self.stations.iter()
    }

    pub fn station_ids(&self) -> impl Iterator<Item = &StationId> {
        self.stations.keys()
    }

    pub fn test_names(&self) -> impl Iterator<Item = &String> {
        self.test_stations.keys()
    }

    pub fn stations_for_test(&self, test: &str) -> Option<&BTreeSet<StationId>> {
        self.test_stations.get(test.trim())
    }

    /// Sum of the given stations' samples under a config filter; unknown stations add nothing.
    pub fn samples_at<'a>(
        &self,
        stations: impl IntoIterator<Item = &'a StationId>,
        configs: &[String],
    ) -> u64 {
        stations
            .into_iter()
            .filter_map(|station| self.stations.get(station))
            .map(|samples| samples.samples_for(configs))
            .sum()
    }
}

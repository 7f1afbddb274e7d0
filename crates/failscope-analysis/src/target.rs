use std::collections::BTreeSet;

use failscope_core::{FilterSet, StationId};

use crate::StationIndex;

/// Stations whose samples form the population for a filter set.
///
/// A test filter selects every station running any listed test (unknown tests select
/// nothing); without one every indexed station is a candidate. A station filter then
/// intersects the candidates.
pub fn select_target_stations(index: &StationIndex, filters: &FilterSet) -> BTreeSet<StationId> {
    let mut targets: BTreeSet<StationId> = if filters.tests.is_empty() {
        index.station_ids().cloned().collect()
    } else {
        filters
            .tests
            .iter()
            .filter_map(|test| index.stations_for_test(test))
            .flat_map(|stations| stations.iter().cloned())
            .collect()
    };

    if !filters.stations.is_empty() {
        let wanted: BTreeSet<&str> = filters.stations.iter().map(|s| s.trim()).collect();
        targets.retain(|station| wanted.contains(station.as_str()));
    }

    targets
}

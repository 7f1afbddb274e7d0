use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use failscope_core::{Dimension, FilterSet, GroupBy, Issue, compare_station_ids};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::aggregate::UnitCounter;
use crate::{AnalysisError, AnalysisOptions, Denominator, DenominatorResolver, StationIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CellSortBy {
    #[default]
    #[serde(rename = "specSN", alias = "spec_sn")]
    SpecSn,
    #[serde(rename = "strifeSN", alias = "strife_sn")]
    StrifeSn,
    #[serde(rename = "total")]
    Total,
}

impl CellSortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpecSn => "specSN",
            Self::StrifeSn => "strifeSN",
            Self::Total => "total",
        }
    }
}

impl std::str::FromStr for CellSortBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "specSN" | "spec_sn" => Ok(Self::SpecSn),
            "strifeSN" | "strife_sn" => Ok(Self::StrifeSn),
            "total" => Ok(Self::Total),
            other => Err(format!(
                "invalid cell sort '{other}', expected one of: specSN, strifeSN, total"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTabRequest {
    pub dim1: Dimension,
    pub dim2: Dimension,
    #[serde(default)]
    pub top: Option<usize>,
    #[serde(default)]
    pub sort_by: CellSortBy,
}

/// One populated cell, encoded on the wire as
/// `[dim1Index, dim2Index, specSN, strifeSN, totalCount]` plus a trailing
/// denominator when the table carries per-cell populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossTabCell {
    pub dim1_index: usize,
    pub dim2_index: usize,
    pub spec_sn: u64,
    pub strife_sn: u64,
    pub total: u64,
    pub denominator: Option<u64>,
}

impl Serialize for CrossTabCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.denominator.is_some() { 6 } else { 5 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&(self.dim1_index as u64))?;
        seq.serialize_element(&(self.dim2_index as u64))?;
        seq.serialize_element(&self.spec_sn)?;
        seq.serialize_element(&self.strife_sn)?;
        seq.serialize_element(&self.total)?;
        if let Some(denominator) = self.denominator {
            seq.serialize_element(&denominator)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CrossTabCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<u64>::deserialize(deserializer)?;
        let (head, denominator) = match raw.as_slice() {
            [a, b, c, d, e] => ([*a, *b, *c, *d, *e], None),
            [a, b, c, d, e, f] => ([*a, *b, *c, *d, *e], Some(*f)),
            other => {
                return Err(de::Error::invalid_length(
                    other.len(),
                    &"a cell of 5 or 6 integers",
                ));
            }
        };
        Ok(Self {
            dim1_index: head[0] as usize,
            dim2_index: head[1] as usize,
            spec_sn: head[2],
            strife_sn: head[3],
            total: head[4],
            denominator,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossTab {
    pub dimension1: Dimension,
    pub dimension2: Dimension,
    pub dimension1_values: Vec<String>,
    pub dimension2_values: Vec<String>,
    pub denom_by_dim2: Vec<u64>,
    pub denom_per_cell: bool,
    pub cells: Vec<CrossTabCell>,
}

#[derive(Default)]
struct CellAccumulator<'a> {
    units: UnitCounter<'a>,
    total: u64,
}

pub fn cross_tabulate(
    records: &[Issue],
    index: &StationIndex,
    filters: &FilterSet,
    request: &CrossTabRequest,
    options: &AnalysisOptions,
) -> Result<CrossTab, AnalysisError> {
    let (dim1, dim2) = (request.dim1, request.dim2);
    if dim1 == dim2 {
        return Err(AnalysisError::InvalidRequest(format!(
            "dimension1 and dimension2 must differ, both are '{dim1}'"
        )));
    }

    let mut accumulators: HashMap<(&str, &str), CellAccumulator<'_>> = HashMap::new();
    for issue in records {
        let (Some(v1), Some(v2)) = (issue.dimension_value(dim1), issue.dimension_value(dim2))
        else {
            continue;
        };
        let cell = accumulators.entry((v1, v2)).or_default();
        cell.units.record(issue);
        cell.total += 1;
    }

    let mut dim1_values: Vec<&str> = accumulators.keys().map(|(v1, _)| *v1).collect();
    dim1_values.sort_by(|a, b| compare_axis_values(dim1, a, b));
    dim1_values.dedup();
    let mut dim2_values: Vec<&str> = accumulators.keys().map(|(_, v2)| *v2).collect();
    dim2_values.sort_by(|a, b| compare_axis_values(dim2, a, b));
    dim2_values.dedup();

    let dim1_positions: HashMap<&str, usize> =
        dim1_values.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let dim2_positions: HashMap<&str, usize> =
        dim2_values.iter().enumerate().map(|(i, v)| (*v, i)).collect();

    let resolver = DenominatorResolver::new(index, options);
    let populations: BTreeMap<&str, Denominator> = dim1_values
        .iter()
        .map(|v1| {
            let population = match resolver.narrowed(dim1, v1, filters, records) {
                Some(narrowed) => resolver.resolve(GroupBy::from(dim2), &narrowed, records),
                None => Denominator::PerValue(BTreeMap::new()),
            };
            (*v1, population)
        })
        .collect();

    let mut entries: Vec<(usize, usize, &CellAccumulator<'_>)> = accumulators
        .iter()
        .map(|((v1, v2), accumulator)| (dim1_positions[v1], dim2_positions[v2], accumulator))
        .collect();
    entries.sort_by_key(|(dim1_index, dim2_index, _)| (*dim1_index, *dim2_index));

    let mut cells = Vec::with_capacity(entries.len());
    let mut recorded: Vec<Option<u64>> = vec![None; dim2_values.len()];
    let mut denom_per_cell = false;

    for (dim1_index, dim2_index, accumulator) in entries {
        let population = populations
            .get(dim1_values[dim1_index])
            .map(|denominator| denominator.get(dim2_values[dim2_index]))
            .unwrap_or(0);

        match recorded[dim2_index] {
            None => recorded[dim2_index] = Some(population),
            Some(first) if first != population => denom_per_cell = true,
            Some(_) => {}
        }

        cells.push(CrossTabCell {
            dim1_index,
            dim2_index,
            spec_sn: accumulator.units.spec(),
            strife_sn: accumulator.units.strife(),
            total: accumulator.total,
            denominator: Some(population),
        });
    }

    cells.sort_by(|left, right| {
        metric(right, request.sort_by)
            .cmp(&metric(left, request.sort_by))
            .then_with(|| right.total.cmp(&left.total))
            .then_with(|| left.dim1_index.cmp(&right.dim1_index))
            .then_with(|| left.dim2_index.cmp(&right.dim2_index))
    });
    cells.truncate(options.effective_top(request.top));

    let denom_by_dim2 = recorded
        .into_iter()
        .map(|population| population.unwrap_or(0))
        .collect();

    if !denom_per_cell {
        cells.iter_mut().for_each(|cell| cell.denominator = None);
    } else {
        tracing::debug!(
            dimension1 = dim1.as_str(),
            dimension2 = dim2.as_str(),
            "populations differ within a column, emitting per-cell denominators"
        );
    }

    Ok(CrossTab {
        dimension1: dim1,
        dimension2: dim2,
        dimension1_values: dim1_values.into_iter().map(str::to_owned).collect(),
        dimension2_values: dim2_values.into_iter().map(str::to_owned).collect(),
        denom_by_dim2,
        denom_per_cell,
        cells,
    })
}

/// Station axes run in numeric order; every other axis is lexicographic.
fn compare_axis_values(dimension: Dimension, left: &str, right: &str) -> Ordering {
    match dimension {
        Dimension::Station => compare_station_ids(left, right),
        _ => left.cmp(right),
    }
}

fn metric(cell: &CrossTabCell, sort_by: CellSortBy) -> u64 {
    match sort_by {
        CellSortBy::SpecSn => cell.spec_sn,
        CellSortBy::StrifeSn => cell.strife_sn,
        CellSortBy::Total => cell.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{issue, row, scenario_a_open_issues, scenario_a_rows};

    fn request(dim1: Dimension, dim2: Dimension) -> CrossTabRequest {
        CrossTabRequest {
            dim1,
            dim2,
            top: None,
            sort_by: CellSortBy::SpecSn,
        }
    }

    #[test]
    fn identical_dimensions_are_rejected() {
        let err = cross_tabulate(
            &[],
            &StationIndex::default(),
            &FilterSet::default(),
            &request(Dimension::Config, Dimension::Config),
            &AnalysisOptions::default(),
        )
        .expect_err("same dimension twice");
        assert!(matches!(err, AnalysisError::InvalidRequest(_)));
    }

    #[test]
    fn station_axis_is_numeric_and_other_axes_lexicographic() {
        let records = vec![
            issue("FA-1", "SN-1", "10", "c2", "T", "Spec"),
            issue("FA-2", "SN-2", "9", "C10", "T", "Spec"),
            issue("FA-3", "SN-3", "2", "C9", "T", "Spec"),
        ];

        let table = cross_tabulate(
            &records,
            &StationIndex::default(),
            &FilterSet::default(),
            &request(Dimension::Station, Dimension::Config),
            &AnalysisOptions::default(),
        )
        .expect("cross tab");

        assert_eq!(table.dimension1_values, vec!["2", "9", "10"]);
        assert_eq!(table.dimension2_values, vec!["C10", "C9", "c2"]);
    }

    #[test]
    fn config_by_location_narrows_population_to_each_config() {
        let index = StationIndex::build(&[row("1", &[("C1", 10), ("C2", 5)], &["T"])]);
        let mut first = issue("FA-1", "SN-1", "1", "C1", "T", "Spec");
        first.failed_location = Some("Power".to_owned());
        let mut second = issue("FA-2", "SN-2", "1", "C2", "T", "Strife");
        second.failed_location = Some("Volume".to_owned());

        let table = cross_tabulate(
            &[first, second],
            &index,
            &FilterSet::default(),
            &request(Dimension::Config, Dimension::Location),
            &AnalysisOptions::default(),
        )
        .expect("cross tab");

        assert_eq!(table.dimension1_values, vec!["C1", "C2"]);
        assert_eq!(table.dimension2_values, vec!["Power", "Volume"]);
        assert!(!table.denom_per_cell);
        assert_eq!(table.denom_by_dim2, vec![10, 5]);
        assert_eq!(
            serde_json::to_value(&table.cells).expect("cells"),
            serde_json::json!([[0, 0, 1, 0, 1], [1, 1, 0, 1, 1]])
        );
    }

    #[test]
    fn differing_column_populations_switch_to_per_cell_denominators() {
        let index = StationIndex::build(&scenario_a_rows());
        let records = vec![
            issue("FA-1", "SN-1", "1", "CFG_A", "Alpha", "Spec"),
            issue("FA-2", "SN-2", "2", "CFG_A", "Beta", "Spec"),
            issue("FA-3", "SN-3", "2", "CFG_A", "Beta", "Spec"),
        ];

        let table = cross_tabulate(
            &records,
            &index,
            &FilterSet::default(),
            &request(Dimension::Station, Dimension::Config),
            &AnalysisOptions::default(),
        )
        .expect("cross tab");

        assert_eq!(table.dimension1_values, vec!["1", "2"]);
        assert!(table.denom_per_cell);
        assert_eq!(table.denom_by_dim2, vec![10]);
        assert_eq!(
            serde_json::to_value(&table.cells).expect("cells"),
            serde_json::json!([[1, 0, 2, 0, 2, 20], [0, 0, 1, 0, 1, 10]])
        );
    }

    #[test]
    fn cells_stay_consistent_with_axes_and_top_truncates() {
        let index = StationIndex::build(&scenario_a_rows());
        let mut records = scenario_a_open_issues();
        records.push(issue("FA-7", "", "2", "CFG_A", "Beta", "Other"));

        let table = cross_tabulate(
            &records,
            &index,
            &FilterSet::default(),
            &CrossTabRequest {
                top: Some(2),
                sort_by: CellSortBy::Total,
                ..request(Dimension::Test, Dimension::Config)
            },
            &AnalysisOptions::default(),
        )
        .expect("cross tab");

        assert_eq!(table.cells.len(), 2);
        for cell in &table.cells {
            assert!(cell.dim1_index < table.dimension1_values.len());
            assert!(cell.dim2_index < table.dimension2_values.len());
            assert!(cell.spec_sn + cell.strife_sn <= cell.total);
        }
        assert_eq!(table.cells[0].total, 2);
    }

    #[test]
    fn cells_round_trip_through_their_array_encoding() {
        let cell: CrossTabCell = serde_json::from_str("[1, 2, 3, 0, 4, 50]").expect("decode");
        assert_eq!(cell.denominator, Some(50));
        assert!(serde_json::from_str::<CrossTabCell>("[1, 2]").is_err());
    }
}

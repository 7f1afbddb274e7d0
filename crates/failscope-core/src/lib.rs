use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod dimension;
mod filter;

pub use dimension::{Dimension, FilterField, GroupBy, Numerator, SortBy};
pub use filter::FilterSet;

pub type ScopeId = i64;
pub type StationId = String;

pub const RESOLVED_STATUS: &str = "retest pass";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid filter set: {0}")]
    Filters(#[from] serde_json::Error),
    #[error("{0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Spec,
    Strife,
    Other,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Strife => "strife",
            Self::Other => "other",
        }
    }

    /// Classifies free-form failure type text such as `Spec.` or `STRIFE`.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed).trim();
        if trimmed.eq_ignore_ascii_case("spec") {
            Self::Spec
        } else if trimmed.eq_ignore_ascii_case("strife") {
            Self::Strife
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Issue {
    pub fa_number: String,
    pub serial_number: Option<String>,
    pub station: Option<String>,
    pub config: Option<String>,
    pub failed_test: Option<String>,
    pub test_id: Option<String>,
    pub failed_location: Option<String>,
    pub symptom: Option<String>,
    pub failure_type: Option<String>,
    pub fa_status: Option<String>,
    pub open_date: Option<NaiveDate>,
    pub priority: Option<String>,
    pub sample_status: Option<String>,
    pub department: Option<String>,
    pub function_or_cosmetic: Option<String>,
    pub unit_number: Option<String>,
}

impl Issue {
    /// Distinct-unit key: the serial number, or the FA number for units without one.
    pub fn dedup_key(&self) -> Option<&str> {
        non_blank(self.serial_number.as_deref()).or_else(|| non_blank(Some(&self.fa_number)))
    }

    pub fn category(&self) -> FailureCategory {
        self.failure_type
            .as_deref()
            .map(FailureCategory::classify)
            .unwrap_or(FailureCategory::Other)
    }

    pub fn is_resolved(&self) -> bool {
        self.fa_status
            .as_deref()
            .is_some_and(|status| status.trim().eq_ignore_ascii_case(RESOLVED_STATUS))
    }

    pub fn dimension_value(&self, dimension: Dimension) -> Option<&str> {
        self.field_value(dimension.filter_field())
    }

    pub fn field_value(&self, field: FilterField) -> Option<&str> {
        let raw = match field {
            FilterField::Station => self.station.as_deref(),
            FilterField::Config => self.config.as_deref(),
            FilterField::Test => self.failed_test.as_deref(),
            FilterField::TestId => self.test_id.as_deref(),
            FilterField::FailureType => self.failure_type.as_deref(),
            FilterField::Location => self.failed_location.as_deref(),
            FilterField::Symptom => self.symptom.as_deref(),
            FilterField::Status => self.fa_status.as_deref(),
            FilterField::Priority => self.priority.as_deref(),
            FilterField::SampleStatus => self.sample_status.as_deref(),
            FilterField::Department => self.department.as_deref(),
            FilterField::FunctionCosmetic => self.function_or_cosmetic.as_deref(),
        };
        non_blank(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    #[serde(default)]
    pub test_id: Option<String>,
    pub test_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizeRow {
    pub station: StationId,
    #[serde(default)]
    pub tests: Vec<TestDescriptor>,
    #[serde(default)]
    pub config_samples: BTreeMap<String, u64>,
}

impl SampleSizeRow {
    pub fn total_samples(&self) -> u64 {
        self.config_samples.values().sum()
    }
}

/// Distinct values available for each filterable attribute of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FilterOptions {
    pub values: BTreeMap<FilterField, Vec<String>>,
}

impl FilterOptions {
    pub fn get(&self, field: FilterField) -> &[String] {
        self.values.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sorts each list, station ids numerically.
    pub fn insert_sorted(&mut self, field: FilterField, mut values: Vec<String>) {
        values.sort_by(|a, b| match field {
            FilterField::Station => compare_station_ids(a, b),
            _ => a.cmp(b),
        });
        values.dedup();
        self.values.insert(field, values);
    }
}

/// Parts per million, rounded half away from zero; zero when the population is empty.
pub fn ppm(failures: u64, samples: u64) -> u64 {
    if samples == 0 {
        return 0;
    }
    ((failures as f64 / samples as f64) * 1_000_000.0).round() as u64
}

/// Orders station ids numerically when both parse as integers, numeric ids first.
pub fn compare_station_ids(left: &str, right: &str) -> std::cmp::Ordering {
    match (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| left.cmp(right)),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, FilterField, Issue, non_blank};

/// Request filters. Lists are OR'd internally and AND'd across fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSet {
    #[serde(
        deserialize_with = "optional_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_from: Option<NaiveDate>,
    #[serde(
        deserialize_with = "optional_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_to: Option<NaiveDate>,
    #[serde(alias = "wfs", deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub stations: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<String>,
    #[serde(
        alias = "failed_tests",
        deserialize_with = "csv_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tests: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub test_ids: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub failure_types: Vec<String>,
    #[serde(
        alias = "failed_locations",
        deserialize_with = "csv_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub locations: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub symptoms: Vec<String>,
    #[serde(
        alias = "fa_statuses",
        deserialize_with = "csv_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub statuses: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub priorities: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub sample_statuses: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub departments: Vec<String>,
    #[serde(deserialize_with = "csv_list", skip_serializing_if = "Vec::is_empty")]
    pub function_cosmetic: Vec<String>,
    #[serde(
        alias = "sn",
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub serial_search: Option<String>,
    #[serde(deserialize_with = "optional_text", skip_serializing_if = "Option::is_none")]
    pub fa_search: Option<String>,
    #[serde(
        alias = "unit_number",
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_search: Option<String>,
}

impl FilterSet {
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn list(&self, field: FilterField) -> &[String] {
        match field {
            FilterField::Station => &self.stations,
            FilterField::Config => &self.configs,
            FilterField::Test => &self.tests,
            FilterField::TestId => &self.test_ids,
            FilterField::FailureType => &self.failure_types,
            FilterField::Location => &self.locations,
            FilterField::Symptom => &self.symptoms,
            FilterField::Status => &self.statuses,
            FilterField::Priority => &self.priorities,
            FilterField::SampleStatus => &self.sample_statuses,
            FilterField::Department => &self.departments,
            FilterField::FunctionCosmetic => &self.function_cosmetic,
        }
    }

    fn list_mut(&mut self, field: FilterField) -> &mut Vec<String> {
        match field {
            FilterField::Station => &mut self.stations,
            FilterField::Config => &mut self.configs,
            FilterField::Test => &mut self.tests,
            FilterField::TestId => &mut self.test_ids,
            FilterField::FailureType => &mut self.failure_types,
            FilterField::Location => &mut self.locations,
            FilterField::Symptom => &mut self.symptoms,
            FilterField::Status => &mut self.statuses,
            FilterField::Priority => &mut self.priorities,
            FilterField::SampleStatus => &mut self.sample_statuses,
            FilterField::Department => &mut self.departments,
            FilterField::FunctionCosmetic => &mut self.function_cosmetic,
        }
    }

    /// Copy with one list replaced; every other constraint is kept.
    pub fn with_list(&self, field: FilterField, values: Vec<String>) -> Self {
        let mut narrowed = self.clone();
        *narrowed.list_mut(field) = values;
        narrowed
    }

    pub fn with_tests(&self, tests: Vec<String>) -> Self {
        self.with_list(FilterField::Test, tests)
    }

    pub fn without(&self, field: FilterField) -> Self {
        self.with_list(field, Vec::new())
    }

    /// In-memory twin of the store's SQL predicate.
    pub fn matches(&self, issue: &Issue) -> bool {
        for field in FilterField::ALL {
            let allowed = self.list(field);
            if allowed.is_empty() {
                continue;
            }
            let Some(value) = issue.field_value(field) else {
                return false;
            };
            if !allowed.iter().any(|candidate| candidate == value) {
                return false;
            }
        }

        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(open_date) = issue.open_date else {
                return false;
            };
            if self.date_from.is_some_and(|from| open_date < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| open_date > to) {
                return false;
            }
        }

        contains_text(issue.serial_number.as_deref(), self.serial_search.as_deref())
            && contains_text(Some(&issue.fa_number), self.fa_search.as_deref())
            && contains_text(issue.unit_number.as_deref(), self.unit_search.as_deref())
    }
}

fn contains_text(haystack: Option<&str>, needle: Option<&str>) -> bool {
    let Some(needle) = needle else {
        return true;
    };
    haystack.is_some_and(|value| {
        value
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    })
}

fn csv_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let mut values = match raw {
        Value::Null => Vec::new(),
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .collect(),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let text = match item {
                    Value::String(text) => text,
                    Value::Number(number) => number.to_string(),
                    other => {
                        return Err(de::Error::custom(format!(
                            "expected string or number list entry, got {other}"
                        )));
                    }
                };
                if let Some(value) = non_blank(Some(&text)) {
                    values.push(value.to_owned());
                }
            }
            values
        }
        other => {
            return Err(de::Error::custom(format!(
                "expected array or comma-separated string, got {other}"
            )));
        }
    };
    values.dedup();
    Ok(values)
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(non_blank(raw.as_deref()).map(str::to_owned))
}

fn optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match non_blank(raw.as_deref()) {
        None => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Some)
            .map_err(|err| de::Error::custom(format!("invalid date '{text}': {err}"))),
    }
}

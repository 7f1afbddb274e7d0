use serde::{Deserialize, Serialize};

use crate::FailureCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    #[serde(alias = "wf")]
    Station,
    Config,
    #[serde(alias = "failed_test")]
    Test,
    #[serde(alias = "failed_location")]
    Location,
    Symptom,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Symptom,
        Self::Station,
        Self::Config,
        Self::Test,
        Self::Location,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Config => "config",
            Self::Test => "test",
            Self::Location => "location",
            Self::Symptom => "symptom",
        }
    }

    pub fn filter_field(self) -> FilterField {
        match self {
            Self::Station => FilterField::Station,
            Self::Config => FilterField::Config,
            Self::Test => FilterField::Test,
            Self::Location => FilterField::Location,
            Self::Symptom => FilterField::Symptom,
        }
    }

    /// Dimensions whose population is tied to the sample-size table.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Station | Self::Config | Self::Test)
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "station" | "wf" => Ok(Self::Station),
            "config" => Ok(Self::Config),
            "test" | "failed_test" => Ok(Self::Test),
            "location" | "failed_location" => Ok(Self::Location),
            "symptom" => Ok(Self::Symptom),
            other => Err(format!(
                "invalid dimension '{other}', expected one of: symptom, config, station, test, location"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    None,
    #[serde(alias = "wf")]
    Station,
    Config,
    #[serde(alias = "failed_test")]
    Test,
    #[serde(alias = "failed_location")]
    Location,
    Symptom,
}

impl GroupBy {
    pub fn as_str(self) -> &'static str {
        match self.dimension() {
            Some(dimension) => dimension.as_str(),
            None => "none",
        }
    }

    pub fn dimension(self) -> Option<Dimension> {
        match self {
            Self::None => None,
            Self::Station => Some(Dimension::Station),
            Self::Config => Some(Dimension::Config),
            Self::Test => Some(Dimension::Test),
            Self::Location => Some(Dimension::Location),
            Self::Symptom => Some(Dimension::Symptom),
        }
    }
}

impl From<Dimension> for GroupBy {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Station => Self::Station,
            Dimension::Config => Self::Config,
            Dimension::Test => Self::Test,
            Dimension::Location => Self::Location,
            Dimension::Symptom => Self::Symptom,
        }
    }
}

impl std::str::FromStr for GroupBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "none" => Ok(Self::None),
            other => other.parse::<Dimension>().map(Self::from).map_err(|_| {
                format!(
                    "invalid groupBy '{other}', expected one of: none, station, config, test, location, symptom"
                )
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Numerator {
    #[default]
    Spec,
    Strife,
    Both,
}

impl Numerator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Strife => "strife",
            Self::Both => "both",
        }
    }

    pub fn includes(self, category: FailureCategory) -> bool {
        match self {
            Self::Spec => category == FailureCategory::Spec,
            Self::Strife => category == FailureCategory::Strife,
            Self::Both => matches!(category, FailureCategory::Spec | FailureCategory::Strife),
        }
    }
}

impl std::str::FromStr for Numerator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "spec" => Ok(Self::Spec),
            "strife" => Ok(Self::Strife),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "invalid numerator '{other}', expected one of: spec, strife, both"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Ppm,
    Failures,
    Key,
}

impl SortBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ppm => "ppm",
            Self::Failures => "failures",
            Self::Key => "key",
        }
    }
}

impl std::str::FromStr for SortBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ppm" => Ok(Self::Ppm),
            "failures" => Ok(Self::Failures),
            "key" => Ok(Self::Key),
            other => Err(format!(
                "invalid sortBy '{other}', expected one of: ppm, failures, key"
            )),
        }
    }
}

/// Every list-valued attribute a filter set can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Station,
    Config,
    Test,
    TestId,
    FailureType,
    Location,
    Symptom,
    Status,
    Priority,
    SampleStatus,
    Department,
    FunctionCosmetic,
}

impl FilterField {
    pub const ALL: [FilterField; 12] = [
        Self::Station,
        Self::Config,
        Self::Test,
        Self::TestId,
        Self::FailureType,
        Self::Location,
        Self::Symptom,
        Self::Status,
        Self::Priority,
        Self::SampleStatus,
        Self::Department,
        Self::FunctionCosmetic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Config => "config",
            Self::Test => "test",
            Self::TestId => "test_id",
            Self::FailureType => "failure_type",
            Self::Location => "location",
            Self::Symptom => "symptom",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::SampleStatus => "sample_status",
            Self::Department => "department",
            Self::FunctionCosmetic => "function_cosmetic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_by_accepts_station_aliases_and_rejects_unknown_values() {
        assert_eq!("wf".parse::<GroupBy>(), Ok(GroupBy::Station));
        assert_eq!("failed_test".parse::<GroupBy>(), Ok(GroupBy::Test));
        assert_eq!(" none ".parse::<GroupBy>(), Ok(GroupBy::None));

        let err = "operator".parse::<GroupBy>().expect_err("unknown group");
        assert!(err.contains("invalid groupBy 'operator'"));
    }

    #[test]
    fn dimension_serde_uses_snake_case_names_and_aliases() {
        let parsed: Dimension = serde_json::from_str("\"failed_location\"").expect("alias");
        assert_eq!(parsed, Dimension::Location);
        assert_eq!(
            serde_json::to_string(&Dimension::Station).expect("serialize"),
            "\"station\""
        );
        assert!(serde_json::from_str::<Dimension>("\"unit\"").is_err());
    }

    #[test]
    fn numerator_both_includes_spec_and_strife_only() {
        assert!(Numerator::Both.includes(FailureCategory::Spec));
        assert!(Numerator::Both.includes(FailureCategory::Strife));
        assert!(!Numerator::Both.includes(FailureCategory::Other));
        assert!(!Numerator::Spec.includes(FailureCategory::Strife));
    }
}

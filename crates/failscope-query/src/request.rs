use failscope_analysis::CellSortBy;
use failscope_core::{Dimension, FilterSet, GroupBy, Numerator, ScopeId, SortBy};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::QueryError;

/// Request for `grouped_failure_rate`. The serialized form is the cache identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct FailureRateQuery {
    pub group_by: GroupBy,
    pub numerator: Numerator,
    pub sort_by: SortBy,
    pub filters: FilterSet,
    pub offset: usize,
    pub limit: Option<usize>,
    #[serde(serialize_with = "ordered_keys")]
    pub keys: Option<Vec<String>>,
}

impl FailureRateQuery {
    pub(crate) fn validate(mut self) -> Result<Self, QueryError> {
        self.keys = validate_keys(self.keys)?;
        if self.keys.is_some() && self.group_by == GroupBy::None {
            return Err(QueryError::InvalidRequest(
                "fixed keys require a groupBy dimension".to_owned(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossTabQuery {
    pub dim1: Dimension,
    pub dim2: Dimension,
    pub filters: FilterSet,
    pub top: Option<usize>,
    pub sort_by: CellSortBy,
}

impl CrossTabQuery {
    pub fn new(dim1: Dimension, dim2: Dimension) -> Self {
        Self {
            dim1,
            dim2,
            filters: FilterSet::default(),
            top: None,
            sort_by: CellSortBy::default(),
        }
    }

    pub(crate) fn validate(self) -> Result<Self, QueryError> {
        if self.dim1 == self.dim2 {
            return Err(QueryError::InvalidRequest(format!(
                "dimension1 and dimension2 must differ, both are '{}'",
                self.dim1
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleSizeQuery {
    pub group_by: Dimension,
    pub filters: FilterSet,
    pub offset: usize,
    pub limit: Option<usize>,
    #[serde(serialize_with = "ordered_keys")]
    pub keys: Option<Vec<String>>,
}

impl SampleSizeQuery {
    pub fn new(group_by: Dimension) -> Self {
        Self {
            group_by,
            filters: FilterSet::default(),
            offset: 0,
            limit: None,
            keys: None,
        }
    }

    pub(crate) fn validate(mut self) -> Result<Self, QueryError> {
        if !self.group_by.is_structural() {
            return Err(QueryError::InvalidRequest(format!(
                "sample sizes can be grouped by station, config or test, not '{}'",
                self.group_by
            )));
        }
        self.keys = validate_keys(self.keys)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SummaryQuery {
    pub filters: FilterSet,
    pub numerator: Numerator,
    pub sort_by: SortBy,
    pub top: Option<usize>,
    pub trend: bool,
}

/// Failure rates for a fixed set of configs across several scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct FrMatrixQuery {
    pub numerator: Numerator,
    pub configs: Option<Vec<String>>,
    pub filters: FilterSet,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// `rows[i]` is `[scopeIndex, configIndex, failures, totalSamples]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrMatrix {
    pub scopes: Vec<ScopeId>,
    pub configs: Vec<String>,
    pub rows: Vec<[u64; 4]>,
}

fn validate_keys(keys: Option<Vec<String>>) -> Result<Option<Vec<String>>, QueryError> {
    let Some(keys) = keys else {
        return Ok(None);
    };
    let keys: Vec<String> = keys
        .into_iter()
        .map(|key| key.trim().to_owned())
        .filter(|key| !key.is_empty())
        .collect();
    if keys.is_empty() {
        return Err(QueryError::InvalidRequest(
            "keys must contain at least one non-blank value".to_owned(),
        ));
    }
    Ok(Some(keys))
}

/// Positions are kept so reordered keys produce a different cache identity.
fn ordered_keys<S: Serializer>(keys: &Option<Vec<String>>, serializer: S) -> Result<S::Ok, S::Error> {
    match keys {
        None => serializer.serialize_none(),
        Some(keys) => {
            let mut seq = serializer.serialize_seq(Some(keys.len()))?;
            for (position, key) in keys.iter().enumerate() {
                seq.serialize_element(&(position, key))?;
            }
            seq.end()
        }
    }
}

#[cfg(test)]
mod tests {
    use failscope_cache::CacheKey;

    use super::*;

    fn with_keys(keys: &[&str]) -> FailureRateQuery {
        FailureRateQuery {
            group_by: GroupBy::Config,
            keys: Some(keys.iter().map(|key| (*key).to_owned()).collect()),
            ..FailureRateQuery::default()
        }
    }

    #[test]
    fn reordered_fixed_keys_hash_differently() {
        let forward = CacheKey::for_params("fr", 1, &with_keys(&["A", "B"])).expect("key");
        let backward = CacheKey::for_params("fr", 1, &with_keys(&["B", "A"])).expect("key");
        assert_ne!(forward, backward);
    }

    #[test]
    fn blank_keys_are_dropped_and_all_blank_is_rejected() {
        let query = with_keys(&[" A ", ""]).validate().expect("valid");
        assert_eq!(query.keys, Some(vec!["A".to_owned()]));

        let err = with_keys(&["  "]).validate().expect_err("all blank");
        assert!(err.is_invalid_request());
    }

    #[test]
    fn identical_cross_tab_dimensions_are_rejected() {
        let err = CrossTabQuery::new(Dimension::Config, Dimension::Config)
            .validate()
            .expect_err("same dimension twice");
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn sample_sizes_reject_free_text_dimensions() {
        let err = SampleSizeQuery::new(Dimension::Location)
            .validate()
            .expect_err("location has no population");
        assert!(err.to_string().contains("not 'location'"));
    }
}

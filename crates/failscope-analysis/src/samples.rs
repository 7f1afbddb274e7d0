use failscope_core::{Dimension, FilterSet, GroupBy, Issue};
use serde::{Deserialize, Serialize};

use crate::{AnalysisError, AnalysisOptions, DenominatorResolver, StationIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizeRequest {
    pub group_by: Dimension,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSizeByGroup {
    pub group_by: Dimension,
    pub keys: Vec<String>,
    pub total_samples: Vec<u64>,
    pub offset: usize,
    pub limit: usize,
    pub total_keys: usize,
}

/// Population per station, config or test, without any numerator.
pub fn sample_size_by_group(
    records: &[Issue],
    index: &StationIndex,
    filters: &FilterSet,
    request: &SampleSizeRequest,
    options: &AnalysisOptions,
) -> Result<SampleSizeByGroup, AnalysisError> {
    let dimension = request.group_by;
    if !dimension.is_structural() {
        return Err(AnalysisError::InvalidRequest(format!(
            "sample sizes can be grouped by station, config or test, not '{dimension}'"
        )));
    }

    let resolver = DenominatorResolver::new(index, options);
    let denominator = resolver.resolve(GroupBy::from(dimension), filters, records);

    if let Some(keys) = &request.keys {
        let keys: Vec<String> = keys.iter().map(|key| key.trim().to_owned()).collect();
        return Ok(SampleSizeByGroup {
            group_by: dimension,
            total_samples: keys.iter().map(|key| denominator.get(key)).collect(),
            offset: 0,
            limit: keys.len(),
            total_keys: keys.len(),
            keys,
        });
    }

    let mut keys: Vec<&str> = denominator.keys().collect();
    keys.sort_unstable();

    let total_keys = keys.len();
    let limit = options.effective_limit(request.limit);
    let offset = request.offset.min(total_keys);
    let page: Vec<&str> = keys.into_iter().skip(offset).take(limit).collect();

    Ok(SampleSizeByGroup {
        group_by: dimension,
        total_samples: page.iter().map(|key| denominator.get(key)).collect(),
        keys: page.into_iter().map(str::to_owned).collect(),
        offset,
        limit,
        total_keys,
    })
}

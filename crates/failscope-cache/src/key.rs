use std::fmt;

use failscope_core::ScopeId;
use serde::Serialize;
use serde_json::{Map, Value};

const DIGEST_HEX_LEN: usize = 16;

/// Cache identity rendered as `prefix:scope` or `prefix:scope:digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    prefix: String,
    scope: ScopeId,
    digest: Option<String>,
}

impl CacheKey {
    pub fn scope_only(prefix: impl Into<String>, scope: ScopeId) -> Self {
        Self {
            prefix: prefix.into(),
            scope,
            digest: None,
        }
    }

    /// Key over normalized request parameters; empty parameters give the scope-only key.
    pub fn for_params<P: Serialize>(
        prefix: impl Into<String>,
        scope: ScopeId,
        params: &P,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(params)?;
        let digest = match normalize_params(value) {
            None => None,
            Some(normalized) => Some(short_digest(&serde_json::to_string(&normalized)?)),
        };
        Ok(Self {
            prefix: prefix.into(),
            scope,
            digest,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.digest {
            Some(digest) => write!(f, "{}:{}:{digest}", self.prefix, self.scope),
            None => write!(f, "{}:{}", self.prefix, self.scope),
        }
    }
}

/// Canonical form of request parameters: nulls, empty strings, empty arrays and empty
/// objects are dropped, arrays are sorted by their JSON text, object keys are ordered.
/// Returns `None` when nothing is left.
pub fn normalize_params(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::Array(items) => {
            let mut items: Vec<(String, Value)> = items
                .into_iter()
                .filter_map(normalize_params)
                .map(|item| (sort_text(&item), item))
                .collect();
            if items.is_empty() {
                return None;
            }
            items.sort_by(|left, right| left.0.cmp(&right.0));
            Some(Value::Array(items.into_iter().map(|(_, item)| item).collect()))
        }
        Value::Object(fields) => {
            let mut ordered: Vec<(String, Value)> = fields
                .into_iter()
                .filter_map(|(key, value)| normalize_params(value).map(|value| (key, value)))
                .collect();
            if ordered.is_empty() {
                return None;
            }
            ordered.sort_by(|left, right| left.0.cmp(&right.0));
            Some(Value::Object(ordered.into_iter().collect::<Map<_, _>>()))
        }
        other => Some(other),
    }
}

fn sort_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn short_digest(canonical: &str) -> String {
    let hex = blake3::hash(canonical.as_bytes()).to_hex();
    hex.as_str()[..DIGEST_HEX_LEN].to_owned()
}

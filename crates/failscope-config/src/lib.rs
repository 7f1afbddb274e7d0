use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FAILSCOPE_DIR_NAME: &str = ".failscope";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SQLITE_FILE: &str = "failscope.sqlite";

pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
pub const DEFAULT_CACHE_MAX_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_COMPUTE_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const DEFAULT_QUERY_MAX_LIMIT: usize = 1000;
pub const DEFAULT_CROSSTAB_TOP: usize = 200;
pub const DEFAULT_CROSSTAB_MAX_TOP: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FailscopeConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_compute_timeout_secs")]
    pub compute_timeout_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_secs(self.compute_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_bytes: DEFAULT_CACHE_MAX_BYTES,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            compute_timeout_secs: DEFAULT_COMPUTE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,
    #[serde(default = "default_query_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_crosstab_top")]
    pub default_top: usize,
    #[serde(default = "default_crosstab_max_top")]
    pub max_top: usize,
    #[serde(default = "default_true")]
    pub exclude_resolved: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
            max_limit: DEFAULT_QUERY_MAX_LIMIT,
            default_top: DEFAULT_CROSSTAB_TOP,
            max_top: DEFAULT_CROSSTAB_MAX_TOP,
            exclude_resolved: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Whether the config filter restricts populations of tests resolved from records.
    #[serde(default = "default_true")]
    pub test_fallback_applies_config_filter: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            test_fallback_applies_config_filter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_file")]
    pub sqlite_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_file: default_sqlite_file(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn failscope_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(FAILSCOPE_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    failscope_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<FailscopeConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(FailscopeConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: FailscopeConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<FailscopeConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(failscope_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = FailscopeConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Reports settings that were accepted but will behave surprisingly.
pub fn validate_config(config: &FailscopeConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.cache.max_entries == 0 {
        warnings.push(ConfigWarning {
            code: "cache_disabled",
            message: "cache.max_entries is 0, every query will be recomputed".to_owned(),
        });
    }
    if config.cache.ttl_secs == 0 {
        warnings.push(ConfigWarning {
            code: "cache_ttl_zero",
            message: "cache.ttl_secs is 0, cached results expire immediately".to_owned(),
        });
    }
    if config.query.default_limit > config.query.max_limit {
        warnings.push(ConfigWarning {
            code: "query_limit_clamped",
            message: format!(
                "query.default_limit {} exceeds query.max_limit {}, the maximum is used",
                config.query.default_limit, config.query.max_limit
            ),
        });
    }
    if config.query.default_top > config.query.max_top {
        warnings.push(ConfigWarning {
            code: "query_top_clamped",
            message: format!(
                "query.default_top {} exceeds query.max_top {}, the maximum is used",
                config.query.default_top, config.query.max_top
            ),
        });
    }
    if !config.query.exclude_resolved {
        warnings.push(ConfigWarning {
            code: "resolved_included",
            message: "query.exclude_resolved is false, retest-pass issues count as failures"
                .to_owned(),
        });
    }

    warnings
}

fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

fn default_cache_max_bytes() -> usize {
    DEFAULT_CACHE_MAX_BYTES
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_compute_timeout_secs() -> u64 {
    DEFAULT_COMPUTE_TIMEOUT_SECS
}

fn default_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_query_max_limit() -> usize {
    DEFAULT_QUERY_MAX_LIMIT
}

fn default_crosstab_top() -> usize {
    DEFAULT_CROSSTAB_TOP
}

fn default_crosstab_max_top() -> usize {
    DEFAULT_CROSSTAB_MAX_TOP
}

fn default_sqlite_file() -> String {
    DEFAULT_SQLITE_FILE.to_owned()
}

fn default_true() -> bool {
    true
}

fn normalize_config(mut config: FailscopeConfig) -> FailscopeConfig {
    let sqlite_file = config.store.sqlite_file.trim();
    if sqlite_file.is_empty() {
        config.store.sqlite_file = default_sqlite_file();
    } else {
        config.store.sqlite_file = sqlite_file.to_owned();
    }

    config.query.max_limit = config.query.max_limit.max(1);
    config.query.max_top = config.query.max_top.max(1);
    config.cache.compute_timeout_secs = config.cache.compute_timeout_secs.max(1);

    config
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ensure_workspace_config_creates_default_file() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();

        let config = ensure_workspace_config(workspace).expect("ensure config");

        assert_eq!(config.cache.max_entries, DEFAULT_CACHE_MAX_ENTRIES);
        assert_eq!(config.cache.ttl(), Duration::from_secs(900));
        assert!(config.analysis.test_fallback_applies_config_filter);
        assert!(config_path(workspace).exists());

        let content = fs::read_to_string(config_path(workspace)).expect("read config file");
        assert!(content.contains("[cache]"));
        assert!(content.contains("max_entries = 100"));
        assert!(content.contains("[analysis]"));
    }

    #[test]
    fn load_workspace_config_parses_partial_sections() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();
        fs::create_dir_all(failscope_dir(workspace)).expect("create .failscope");

        let raw = r#"
[cache]
max_entries = 10
ttl_secs = 60

[query]
max_limit = 0

[analysis]
test_fallback_applies_config_filter = false

[store]
sqlite_file = "  "
"#;
        fs::write(config_path(workspace), raw).expect("write config");

        let config = load_workspace_config(workspace).expect("load config");

        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_bytes, DEFAULT_CACHE_MAX_BYTES);
        assert_eq!(config.query.max_limit, 1);
        assert_eq!(config.query.default_limit, DEFAULT_QUERY_LIMIT);
        assert!(!config.analysis.test_fallback_applies_config_filter);
        assert_eq!(config.store.sqlite_file, DEFAULT_SQLITE_FILE);
    }

    #[test]
    fn load_workspace_config_without_file_returns_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_workspace_config(temp.path()).expect("load config");
        assert_eq!(config, FailscopeConfig::default());
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn validate_config_flags_clamped_and_disabled_settings() {
        let mut config = FailscopeConfig::default();
        config.cache.max_entries = 0;
        config.query.default_limit = 5000;
        config.query.exclude_resolved = false;

        let codes = validate_config(&config)
            .into_iter()
            .map(|warning| warning.code)
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec!["cache_disabled", "query_limit_clamped", "resolved_included"]
        );
    }
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use failscope_core::{Issue, SampleSizeRow, ScopeId};
use failscope_store::Store;
use serde::Deserialize;

/// On-disk import format: `{ "issues": [...], "sample_sizes": [...] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportFile {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, alias = "sampleSizes")]
    pub sample_sizes: Vec<SampleSizeRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub scope: ScopeId,
    pub issues: usize,
    pub stations: usize,
}

pub fn read_import_file(path: &Path) -> Result<ImportFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse import file {}", path.display()))
}

/// Creates a scope and fills it. A failed load removes the half-built scope again.
pub fn import_scope(store: &dyn Store, name: &str, file: &ImportFile) -> Result<ImportOutcome> {
    let scope = store
        .create_scope(name)
        .with_context(|| format!("failed to create scope '{name}'"))?;

    let loaded = store
        .insert_issues(scope, &file.issues)
        .and_then(|issues| {
            store
                .replace_sample_sizes(scope, &file.sample_sizes)
                .map(|stations| (issues, stations))
        });

    match loaded {
        Ok((issues, stations)) => {
            tracing::info!(scope, name, issues, stations, "imported scope");
            Ok(ImportOutcome {
                scope,
                issues,
                stations,
            })
        }
        Err(err) => {
            if let Err(cleanup) = store.delete_scope(scope) {
                tracing::warn!(scope, error = %cleanup, "failed to remove partially imported scope");
            }
            Err(err).with_context(|| format!("failed to load records into scope '{name}'"))
        }
    }
}

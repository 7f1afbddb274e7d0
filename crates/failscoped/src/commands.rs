use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use failscope_config::{FailscopeConfig, ensure_workspace_config, validate_config};
use failscope_core::ScopeId;
use failscope_query::{
    CrossTabQuery, FailureRateQuery, FailureRateService, FrMatrixQuery, SampleSizeQuery,
    StoreSource, SummaryQuery,
};
use failscope_store::{SqliteStore, Store};
use serde::Serialize;

use crate::cli::{Cli, Commands, OutputFormat};
use crate::import::{import_scope, read_import_file};
use crate::output;

pub fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config under {}",
            workspace.display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let mut out = std::io::stdout().lock();
    run_command(&workspace, &config, cli.command, cli.output, &mut out)
}

pub fn run_command(
    workspace: &Path,
    config: &FailscopeConfig,
    command: Commands,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let store = SqliteStore::open_file(workspace, &config.store.sqlite_file)
        .context("failed to open workspace store")?;

    match command {
        Commands::Import(args) => {
            let file = read_import_file(&args.file)?;
            let name = args.name.unwrap_or_else(|| {
                args.file
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "imported".to_owned())
            });
            let outcome = import_scope(&store, &name, &file)?;
            match format {
                OutputFormat::Json => output::write_json(
                    &serde_json::json!({
                        "scope": outcome.scope,
                        "issues": outcome.issues,
                        "stations": outcome.stations,
                    }),
                    out,
                )?,
                OutputFormat::Table => writeln!(
                    out,
                    "scope\tissues\tstations\n{}\t{}\t{}",
                    outcome.scope, outcome.issues, outcome.stations
                )?,
            }
            Ok(())
        }
        Commands::Scopes => {
            let scopes = store.list_scopes().context("failed to list scopes")?;
            match format {
                OutputFormat::Json => output::write_json(&scopes_json(&scopes), out)?,
                OutputFormat::Table => output::write_scopes(&scopes, out)?,
            }
            Ok(())
        }
        Commands::DeleteScope(args) => {
            if !store
                .delete_scope(args.scope)
                .with_context(|| format!("failed to delete scope {}", args.scope))?
            {
                bail!("scope {} does not exist", args.scope);
            }
            tracing::info!(scope = args.scope, "deleted scope");
            Ok(())
        }
        query => run_query(store, config, query, format, out),
    }
}

fn run_query(
    store: SqliteStore,
    config: &FailscopeConfig,
    command: Commands,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    for scope in command_scopes(&command) {
        if store
            .get_scope(scope)
            .with_context(|| format!("failed to read scope {scope}"))?
            .is_none()
        {
            bail!("scope {scope} does not exist");
        }
    }

    let service = FailureRateService::new(Arc::new(StoreSource::new(store)), config);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        match command {
            Commands::Rate(args) => {
                let keys = (!args.keys.is_empty()).then_some(args.keys);
                let rate = service
                    .grouped_failure_rate(
                        args.scope,
                        FailureRateQuery {
                            group_by: args.group_by,
                            numerator: args.numerator,
                            sort_by: args.sort_by,
                            filters: args.filter.filters,
                            offset: args.offset,
                            limit: args.limit,
                            keys,
                        },
                    )
                    .await
                    .context("failure rate query failed")?;
                emit(&rate, format, out, output::write_rate)
            }
            Commands::Crosstab(args) => {
                let table = service
                    .cross_tabulation(
                        args.scope,
                        CrossTabQuery {
                            dim1: args.dim1,
                            dim2: args.dim2,
                            filters: args.filter.filters,
                            top: args.top,
                            sort_by: args.sort_by,
                        },
                    )
                    .await
                    .context("cross tabulation failed")?;
                emit(&table, format, out, output::write_cross_tab)
            }
            Commands::Samples(args) => {
                let keys = (!args.keys.is_empty()).then_some(args.keys);
                let sizes = service
                    .sample_size_by_group(
                        args.scope,
                        SampleSizeQuery {
                            group_by: args.group_by,
                            filters: args.filter.filters,
                            offset: args.offset,
                            limit: args.limit,
                            keys,
                        },
                    )
                    .await
                    .context("sample size query failed")?;
                emit(&sizes, format, out, output::write_samples)
            }
            Commands::Summary(args) => {
                let summary = service
                    .summary(
                        args.scope,
                        SummaryQuery {
                            filters: args.filter.filters,
                            numerator: args.numerator,
                            sort_by: args.sort_by,
                            top: args.top,
                            trend: args.trend,
                        },
                    )
                    .await
                    .context("summary query failed")?;
                emit(&summary, format, out, output::write_summary)
            }
            Commands::Options(args) => {
                let options = service
                    .filter_options(args.scope, args.filter.filters)
                    .await
                    .context("filter options query failed")?;
                emit(&options, format, out, output::write_options)
            }
            Commands::Matrix(args) => {
                let configs = (!args.configs.is_empty()).then_some(args.configs);
                let matrix = service
                    .failure_rate_matrix(
                        &args.scopes,
                        FrMatrixQuery {
                            numerator: args.numerator,
                            configs,
                            filters: args.filter.filters,
                            offset: args.offset,
                            limit: args.limit,
                        },
                    )
                    .await
                    .context("failure rate matrix failed")?;
                emit(&matrix, format, out, output::write_matrix)
            }
            Commands::Import(_) | Commands::Scopes | Commands::DeleteScope(_) => {
                bail!("not a query command")
            }
        }
    })
}

fn command_scopes(command: &Commands) -> Vec<ScopeId> {
    match command {
        Commands::Rate(args) => vec![args.scope],
        Commands::Crosstab(args) => vec![args.scope],
        Commands::Samples(args) => vec![args.scope],
        Commands::Summary(args) => vec![args.scope],
        Commands::Options(args) => vec![args.scope],
        Commands::Matrix(args) => args.scopes.clone(),
        Commands::Import(_) | Commands::Scopes | Commands::DeleteScope(_) => Vec::new(),
    }
}

fn emit<T: Serialize>(
    value: &T,
    format: OutputFormat,
    out: &mut dyn Write,
    table: fn(&T, &mut dyn Write) -> std::io::Result<()>,
) -> Result<()> {
    match format {
        OutputFormat::Json => output::write_json(value, out),
        OutputFormat::Table => table(value, out),
    }
    .context("failed to write output")
}

fn scopes_json(scopes: &[failscope_store::ScopeRecord]) -> serde_json::Value {
    scopes
        .iter()
        .map(|scope| {
            serde_json::json!({
                "id": scope.id,
                "name": scope.name,
                "createdAt": scope.created_at,
                "issueCount": scope.issue_count,
                "stationCount": scope.station_count,
            })
        })
        .collect()
}

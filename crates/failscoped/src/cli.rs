use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use failscope_analysis::CellSortBy;
use failscope_core::{Dimension, FilterSet, GroupBy, Numerator, ScopeId, SortBy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Failure-rate analytics over FA issue records")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .failscope/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        global = true,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table (tab separated) or json"
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Load issues and sample sizes from a JSON file into a new scope.
    Import(ImportArgs),
    /// List scopes in the workspace store.
    Scopes,
    /// Delete a scope with its issues and sample sizes.
    DeleteScope(ScopeArgs),
    /// Failure rate grouped by one dimension.
    Rate(RateArgs),
    /// Distinct failing units for every pair of values of two dimensions.
    Crosstab(CrossTabArgs),
    /// Population per station, config or test.
    Samples(SamplesArgs),
    /// Overview, per-dimension distributions, status breakdown and trend.
    Summary(SummaryArgs),
    /// Distinct values available for each filter.
    Options(OptionsArgs),
    /// Config failure rates across several scopes.
    Matrix(MatrixArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ImportArgs {
    #[arg(help = "JSON file with `issues` and `sample_sizes` arrays")]
    pub file: PathBuf,

    #[arg(long, help = "Scope name; defaults to the file stem")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ScopeArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct FilterArgs {
    #[arg(
        long,
        default_value = "{}",
        value_parser = parse_filters,
        help = "Filters as a JSON object, e.g. '{\"configs\":[\"CFG_A\"],\"date_from\":\"2024-01-01\"}'"
    )]
    pub filters: FilterSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RateArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,

    #[arg(
        long,
        default_value = "none",
        value_parser = parse_group_by,
        help = "Grouping: none, station, config, test, location or symptom"
    )]
    pub group_by: GroupBy,

    #[arg(
        long,
        default_value = "spec",
        value_parser = parse_numerator,
        help = "Numerator: spec, strife or both"
    )]
    pub numerator: Numerator,

    #[arg(
        long,
        default_value = "ppm",
        value_parser = parse_sort_by,
        help = "Ordering: ppm, failures or key"
    )]
    pub sort_by: SortBy,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long, help = "Page size, clamped to the configured maximum")]
    pub limit: Option<usize>,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Fixed comma-separated keys; disables sorting and paging"
    )]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CrossTabArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,

    #[arg(long, value_parser = parse_dimension)]
    pub dim1: Dimension,

    #[arg(long, value_parser = parse_dimension)]
    pub dim2: Dimension,

    #[arg(long, help = "Maximum cells, clamped to the configured maximum")]
    pub top: Option<usize>,

    #[arg(
        long,
        default_value = "specSN",
        value_parser = parse_cell_sort,
        help = "Cell ordering: specSN, strifeSN or total"
    )]
    pub sort_by: CellSortBy,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SamplesArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,

    #[arg(
        long,
        value_parser = parse_dimension,
        help = "Grouping: station, config or test"
    )]
    pub group_by: Dimension,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, value_delimiter = ',')]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SummaryArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,

    #[arg(long, default_value = "spec", value_parser = parse_numerator)]
    pub numerator: Numerator,

    #[arg(long, default_value = "ppm", value_parser = parse_sort_by)]
    pub sort_by: SortBy,

    #[arg(long, help = "Entries per distribution")]
    pub top: Option<usize>,

    #[arg(long, help = "Include a trend series; needs date_from and date_to filters")]
    pub trend: bool,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct OptionsArgs {
    #[arg(help = "Scope id")]
    pub scope: ScopeId,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct MatrixArgs {
    #[arg(required = true, value_delimiter = ',', help = "Comma-separated scope ids")]
    pub scopes: Vec<ScopeId>,

    #[arg(long, default_value = "spec", value_parser = parse_numerator)]
    pub numerator: Numerator,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Configs to compare; defaults to the first scope's configs"
    )]
    pub configs: Vec<String>,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_group_by(value: &str) -> Result<GroupBy, String> {
    value.parse()
}

fn parse_dimension(value: &str) -> Result<Dimension, String> {
    value.parse()
}

fn parse_numerator(value: &str) -> Result<Numerator, String> {
    value.parse()
}

fn parse_sort_by(value: &str) -> Result<SortBy, String> {
    value.parse()
}

fn parse_cell_sort(value: &str) -> Result<CellSortBy, String> {
    value.parse()
}

fn parse_filters(value: &str) -> Result<FilterSet, String> {
    FilterSet::from_json_str(value).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn rate_flags_parse_into_typed_values() {
        let cli = Cli::try_parse_from([
            "failscoped",
            "--workspace",
            "/tmp/ws",
            "rate",
            "3",
            "--group-by",
            "config",
            "--numerator",
            "both",
            "--filters",
            r#"{"wfs":["1","2"],"date_from":"2024-01-01"}"#,
            "--keys",
            "CFG_A,CFG_B",
            "--output",
            "json",
        ])
        .expect("rate flags should parse");

        assert_eq!(cli.output.as_str(), "json");
        let Commands::Rate(args) = cli.command else {
            panic!("expected rate command");
        };
        assert_eq!(args.scope, 3);
        assert_eq!(args.group_by, GroupBy::Config);
        assert_eq!(args.numerator, Numerator::Both);
        assert_eq!(args.filter.filters.stations, vec!["1", "2"]);
        assert_eq!(args.keys, vec!["CFG_A", "CFG_B"]);
    }

    #[test]
    fn unknown_filter_keys_are_rejected() {
        let err = Cli::try_parse_from([
            "failscoped",
            "options",
            "1",
            "--filters",
            r#"{"colour":["red"]}"#,
        ])
        .expect_err("unknown filter key");
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn unknown_group_by_is_rejected() {
        Cli::try_parse_from(["failscoped", "rate", "1", "--group-by", "planet"])
            .expect_err("planet is not a dimension");
    }

    #[test]
    fn matrix_takes_comma_separated_scopes() {
        let cli = Cli::try_parse_from(["failscoped", "matrix", "1,2,5", "--log-format", "json"])
            .expect("matrix flags should parse");

        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Matrix(args) = cli.command else {
            panic!("expected matrix command");
        };
        assert_eq!(args.scopes, vec![1, 2, 5]);
        assert!(args.configs.is_empty());
        assert!(args.filter.filters.is_empty());
    }

    #[test]
    fn crosstab_defaults_to_spec_unit_ordering() {
        let cli = Cli::try_parse_from([
            "failscoped",
            "crosstab",
            "4",
            "--dim1",
            "config",
            "--dim2",
            "wf",
        ])
        .expect("crosstab flags should parse");

        let Commands::Crosstab(args) = cli.command else {
            panic!("expected crosstab command");
        };
        assert_eq!(args.dim2, Dimension::Station);
        assert_eq!(args.sort_by, CellSortBy::SpecSn);
        assert_eq!(args.top, None);
    }
}

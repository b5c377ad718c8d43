use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::ParamValue;

/// Command-line arguments for the querycache binary.
#[derive(Debug, Parser)]
#[command(
    name = "querycache",
    version,
    about = "Inspect query cache keys and settings"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "QUERYCACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the canonical cache key of a query invocation as JSON.
    Normalize(Box<NormalizeArgs>),
    /// Print the resolved settings.
    #[command(name = "show-config")]
    ShowConfig(ShowConfigArgs),
}

impl Command {
    pub fn overrides(&self) -> &RuntimeOverrides {
        match self {
            Self::Normalize(args) => &args.overrides,
            Self::ShowConfig(args) => &args.overrides,
        }
    }
}

/// Overrides shared by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the query cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the largest id batch loaded at once on a partial cache hit.
    #[arg(long = "cache-max-batch-size", value_name = "COUNT")]
    pub cache_max_batch_size: Option<usize>,

    /// Override the number of query results kept in memory.
    #[arg(long = "cache-query-result-limit", value_name = "COUNT")]
    pub cache_query_result_limit: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ShowConfigArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct NormalizeArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Query text containing `:name` parameter tokens.
    #[arg(value_name = "TEXT")]
    pub text: String,

    /// Bind a named parameter as `name=value`.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_binding)]
    pub params: Vec<Binding>,

    /// Bind a 1-based positional parameter as `N=value`.
    #[arg(long = "positional", value_name = "N=VALUE", value_parser = parse_positional)]
    pub positional: Vec<(u32, ParamValue)>,

    /// Attach an additional criterion as `key=value`.
    #[arg(long = "criterion", value_name = "KEY=VALUE", value_parser = parse_binding)]
    pub criteria: Vec<Binding>,

    /// First row of the pagination window.
    #[arg(long = "first-row", default_value_t = 0, value_name = "ROW")]
    pub first_row: u32,

    /// Maximum rows of the pagination window.
    #[arg(long = "max-rows", value_name = "COUNT")]
    pub max_rows: Option<u32>,

    /// Mark the query as filtering soft-deleted rows.
    #[arg(long = "soft-deletion", action = clap::ArgAction::SetTrue)]
    pub soft_deletion: bool,

    /// Mark the query as returning a single result.
    #[arg(long = "single-result", action = clap::ArgAction::SetTrue)]
    pub single_result: bool,
}

/// A `name=value` pair from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: ParamValue,
}

fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected `name=value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in `{raw}`"));
    }
    Ok((name, value))
}

/// JSON scalars keep their type; anything else is bound as text.
fn parse_value(raw: &str) -> ParamValue {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| ParamValue::from_json_scalar(&value))
        .unwrap_or_else(|| ParamValue::Text(raw.to_string()))
}

fn parse_binding(raw: &str) -> Result<Binding, String> {
    let (name, value) = split_pair(raw)?;
    Ok(Binding {
        name: name.trim_start_matches(':').to_string(),
        value: parse_value(value),
    })
}

fn parse_positional(raw: &str) -> Result<(u32, ParamValue), String> {
    let (position, value) = split_pair(raw)?;
    let position = position
        .parse::<u32>()
        .map_err(|err| format!("invalid position `{position}`: {err}"))?;
    Ok((position, parse_value(value)))
}

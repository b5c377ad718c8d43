use std::io::{self, Write};
use std::process;

use querycache::{
    cache::{CacheConfig, QueryCacheError, QueryKey},
    config::{self, Command, LogFormat, NormalizeArgs, Settings},
    infra::{error::InfraError, telemetry},
};
use serde_json::json;
use thiserror::Error;
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] QueryCacheError),
}

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Some(Command::Normalize(args)) => run_normalize(&args),
        Some(Command::ShowConfig(_)) | None => run_show_config(&settings),
    }
}

fn run_normalize(args: &NormalizeArgs) -> Result<(), AppError> {
    let mut builder = QueryKey::builder(args.text.as_str())
        .window(args.first_row, args.max_rows)
        .soft_deletion(args.soft_deletion)
        .single_result(args.single_result);

    for binding in &args.params {
        builder = builder.named(binding.name.as_str(), binding.value.clone());
    }
    for (position, value) in &args.positional {
        builder = builder.positional(*position, value.clone());
    }
    for criterion in &args.criteria {
        builder = builder.criterion(criterion.name.as_str(), criterion.value.clone());
    }

    let key = builder.build()?;
    debug!(query = %key, "Normalized query key");

    print_json(&json!({
        "hash": format!("{:016x}", key.hash_code()),
        "key": key,
    }))
}

fn run_show_config(settings: &Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    let format = match settings.logging.format {
        LogFormat::Json => "json",
        LogFormat::Compact => "compact",
    };

    print_json(&json!({
        "logging": {
            "level": settings.logging.level.to_string(),
            "format": format,
        },
        "cache": {
            "enabled": cache.enabled,
            "max_batch_size": cache.max_batch_size,
            "query_result_limit": cache.query_result_limit,
        },
    }))
}

fn print_json(value: &serde_json::Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(InfraError::from)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{rendered}").map_err(InfraError::from)?;
    Ok(())
}

use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "querycache_hit_total",
            Unit::Count,
            "Total number of query cache lookups that found a stored result."
        );
        describe_counter!(
            "querycache_miss_total",
            Unit::Count,
            "Total number of query cache lookups that found nothing."
        );
        describe_counter!(
            "querycache_fast_path_total",
            Unit::Count,
            "Hits resolved by point-loading ids already in the entity cache."
        );
        describe_counter!(
            "querycache_slow_path_total",
            Unit::Count,
            "Hits resolved by reloading ids in batches."
        );
        describe_counter!(
            "querycache_batch_load_total",
            Unit::Count,
            "Total number of batch loads issued on the slow path."
        );
        describe_counter!(
            "querycache_stale_id_dropped_total",
            Unit::Count,
            "Cached ids dropped because the entity no longer exists."
        );
        describe_counter!(
            "querycache_store_evict_total",
            Unit::Count,
            "Query results evicted from the in-memory store due to capacity."
        );
        describe_counter!(
            "querycache_invalidate_total",
            Unit::Count,
            "Total number of invalidation requests applied."
        );
        describe_histogram!(
            "querycache_slow_path_ms",
            Unit::Milliseconds,
            "Slow-path reload latency in milliseconds."
        );
    });
}

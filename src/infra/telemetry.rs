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
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(InfraError::Telemetry)
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "modverse_counter_sync_cycles_total",
            Unit::Count,
            "Counter sync cycles by outcome (completed, contended, failed)."
        );
        describe_counter!(
            "modverse_counter_sync_keys_total",
            Unit::Count,
            "Counter keys handled by the sync job by outcome (merged, skipped, failed)."
        );
        describe_histogram!(
            "modverse_counter_sync_cycle_ms",
            Unit::Milliseconds,
            "Counter sync cycle latency in milliseconds."
        );
        describe_counter!(
            "modverse_count_baseline_total",
            Unit::Count,
            "Count baseline lookups by result (hit, miss)."
        );
        describe_counter!(
            "modverse_flag_lookup_total",
            Unit::Count,
            "Relation flag lookups by result (hit, miss)."
        );
        describe_histogram!(
            "modverse_http_request_ms",
            Unit::Milliseconds,
            "HTTP request latency in milliseconds."
        );
    });
}

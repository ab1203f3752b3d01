use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{METRIC_HIT, METRIC_INVALIDATED, METRIC_MISS, METRIC_STORE, METRIC_STORE_ERROR};
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
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT,
            Unit::Count,
            "Total number of GET requests answered from the cache."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Total number of GET requests that reached the handler."
        );
        describe_counter!(
            METRIC_STORE,
            Unit::Count,
            "Total number of response bodies written to the store."
        );
        describe_counter!(
            METRIC_INVALIDATED,
            Unit::Count,
            "Total number of cache keys deleted by write requests."
        );
        describe_counter!(
            METRIC_STORE_ERROR,
            Unit::Count,
            "Total number of failed or timed-out store operations, by op."
        );
    });
}

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
/// Logs go to stderr; stdout carries command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
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
            "cloudcache_purge_targets_recorded_total",
            Unit::Count,
            "Total number of distinct purge targets recorded by collectors."
        );
        describe_counter!(
            "cloudcache_purge_flush_total",
            Unit::Count,
            "Total number of collector flushes, labelled by result."
        );
        describe_counter!(
            "cloudcache_purge_dispatch_total",
            Unit::Count,
            "Total number of purge service calls, labelled by result."
        );
        describe_histogram!(
            "cloudcache_purge_dispatch_ms",
            Unit::Milliseconds,
            "Purge service call latency in milliseconds."
        );
        describe_counter!(
            "cloudcache_cdn_urls_rewritten_total",
            Unit::Count,
            "Total number of image URLs pointed at the CDN."
        );
    });
}

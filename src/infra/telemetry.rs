use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Keeps the non-blocking log writer alive for the process lifetime.
/// Dropping it flushes and stops the background appender thread.
pub struct TelemetryGuard {
    _file_writer: WorkerGuard,
}

/// Install a global tracing subscriber using the provided logging settings.
///
/// Log lines go to stdout in the configured format and to a daily-rolling
/// file in the guarded log directory.
pub fn init(logging: &LoggingSettings) -> Result<TelemetryGuard, InfraError> {
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

    let appender = tracing_appender::rolling::daily(&logging.directory, "stampa.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    Ok(TelemetryGuard {
        _file_writer: guard,
    })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "stampa_render_total",
            Unit::Count,
            "Total number of successfully rendered merge requests."
        );
        describe_counter!(
            "stampa_render_failure_total",
            Unit::Count,
            "Total number of failed per-document renders."
        );
        describe_counter!(
            "stampa_browser_relaunch_total",
            Unit::Count,
            "Total number of browser session relaunches."
        );
        describe_counter!(
            "stampa_log_reclaimed_bytes_total",
            Unit::Bytes,
            "Total bytes reclaimed by the log capacity guard."
        );
        describe_histogram!(
            "stampa_render_ms",
            Unit::Milliseconds,
            "End-to-end render-and-merge latency in milliseconds."
        );
    });
}

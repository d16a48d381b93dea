use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use sentry::{types::ParseDsnError, ClientInitGuard};
use sentry_tracing::{EventFilter, SentryLayer};
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::Settings;

/// Tracing target whose error events are sent to the error-reporting service.
pub const ERROR_REPORT_TARGET: &str = "journal::error_report";

/// Starts the error-reporting client when `SENTRY_DSN` is set. Hold the guard until
/// exit; dropping it flushes queued reports.
pub fn init_error_reporting(settings: &Settings) -> Result<Option<ClientInitGuard>, ParseDsnError> {
    let Some(dsn) = settings.sentry_dsn.as_deref() else {
        return Ok(None);
    };
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn.parse()?),
        release: sentry::release_name!(),
        ..Default::default()
    });
    Ok(Some(guard))
}

/// Installs the global subscriber. `RUST_LOG` wins over LOG_LEVEL when set.
pub fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_filter()));
    let output = if settings.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(settings.sentry_dsn.is_some().then(report_layer))
        .init();
}

/// Forwards report-target errors as events; other info and above become breadcrumbs.
pub fn report_layer<S>() -> SentryLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    sentry_tracing::layer().event_filter(report_filter)
}

fn report_filter(metadata: &Metadata<'_>) -> EventFilter {
    match *metadata.level() {
        Level::ERROR if metadata.target() == ERROR_REPORT_TARGET => EventFilter::Event,
        Level::ERROR | Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        _ => EventFilter::Ignore,
    }
}

/// Installs the Prometheus recorder; the handle renders the `/metrics` page.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("http_request_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        )?
        .install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_report_target_errors_are_sent() {
        let events = sentry::test::with_captured_events(|| {
            let subscriber = tracing_subscriber::registry().with(report_layer());
            tracing::subscriber::with_default(subscriber, || {
                tracing::error!(target: ERROR_REPORT_TARGET, error = "disk full", "Storage failure");
                tracing::error!("Unrelated failure");
                tracing::warn!("Slow request");
            });
        });
        assert_eq!(events.len(), 1);
        let message = events[0].message.clone().unwrap_or_default();
        assert!(message.contains("Storage failure"), "{}", message);
    }

    #[test]
    fn test_no_dsn_no_client() {
        assert!(init_error_reporting(&Settings::default()).unwrap().is_none());

        let settings = Settings {
            sentry_dsn: Some("not a dsn".to_string()),
            ..Settings::default()
        };
        assert!(init_error_reporting(&settings).is_err());
    }
}

//! Logging for the bookshelf binary
//!
//! One `tracing` registry: a compact stderr layer, plus an OTLP span exporter
//! when `--otel` is given and the `telemetry` feature is compiled in. Stderr
//! keeps `bookshelf query` output on stdout clean JSON.
//!
//! Environment variables:
//!   RUST_LOG                            # Log filter, overrides --debug
//!   OTEL_EXPORTER_OTLP_ENDPOINT         # OTLP endpoint (default: http://localhost:4317)
//!   OTEL_SERVICE_NAME                   # Service name (default: bookshelf)

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
const DEFAULT_SERVICE_NAME: &str = "bookshelf";

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Debug level unless RUST_LOG is set
    pub debug: bool,
    /// Enable OpenTelemetry OTLP export
    pub otel: bool,
}

/// Where spans go when OTLP export is on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtelSettings {
    pub endpoint: String,
    pub service_name: String,
}

#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
impl OtelSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        Self {
            endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string()),
            service_name: non_empty("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
        }
    }
}

/// Filter directives: a non-empty `RUST_LOG` wins, otherwise the level from
/// `--debug`. sqlx statement logging stays at warn unless debugging.
pub fn filter_directives(config: &TracingConfig, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => directives.to_string(),
        None if config.debug => "debug".to_string(),
        None => "info,sqlx=warn".to_string(),
    }
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    let rust_log = std::env::var("RUST_LOG").ok();
    EnvFilter::try_new(filter_directives(config, rust_log.as_deref()))
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config, None)))
}

/// Install the global subscriber.
pub fn init(config: &TracingConfig) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact();

    #[cfg(feature = "telemetry")]
    let otel_settings = config.otel.then(OtelSettings::from_env);
    #[cfg(not(feature = "telemetry"))]
    let otel_settings: Option<OtelSettings> = None;

    #[cfg(feature = "telemetry")]
    let otel_layer = match &otel_settings {
        Some(settings) => Some(tracing_opentelemetry::layer().with_tracer(otel::tracer(settings)?)),
        None => None,
    };
    #[cfg(not(feature = "telemetry"))]
    let otel_layer = None::<tracing_subscriber::layer::Identity>;

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    match otel_settings {
        Some(settings) => tracing::info!(
            endpoint = %settings.endpoint,
            service = %settings.service_name,
            "exporting traces over OTLP"
        ),
        None if config.otel => {
            tracing::warn!("--otel ignored: built without the telemetry feature")
        }
        None => {}
    }
    Ok(())
}

#[cfg(feature = "telemetry")]
mod otel {
    use anyhow::{anyhow, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{Tracer, TracerProvider};

    use super::OtelSettings;

    pub(super) fn provider(settings: &OtelSettings) -> Result<TracerProvider> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&settings.endpoint)
            .build()
            .map_err(|e| anyhow!("Failed to create OTLP exporter: {}", e))?;

        let resource = opentelemetry_sdk::Resource::new(vec![KeyValue::new(
            "service.name",
            settings.service_name.clone(),
        )]);

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(resource)
            .build())
    }

    /// Registers the provider globally so `shutdown_otel` can flush it.
    pub(super) fn tracer(settings: &OtelSettings) -> Result<Tracer> {
        let provider = provider(settings)?;
        let tracer = provider.tracer("bookshelf");
        let _ = opentelemetry::global::set_tracer_provider(provider);
        Ok(tracer)
    }
}

/// Flush pending spans
#[cfg(feature = "telemetry")]
pub fn shutdown_otel() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_otel() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_debug_flag() {
        let debug = TracingConfig {
            debug: true,
            otel: false,
        };
        assert_eq!(
            filter_directives(&debug, Some("bookshelf_server=trace")),
            "bookshelf_server=trace"
        );
        assert_eq!(filter_directives(&debug, None), "debug");
        assert_eq!(filter_directives(&debug, Some("  ")), "debug");
    }

    #[test]
    fn default_filter_quiets_sqlx() {
        let directives = filter_directives(&TracingConfig::default(), None);
        assert_eq!(directives, "info,sqlx=warn");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn otel_settings_default_and_override() {
        let settings = OtelSettings::from_lookup(|_| None);
        assert_eq!(settings.endpoint, "http://localhost:4317");
        assert_eq!(settings.service_name, "bookshelf");

        let settings = OtelSettings::from_lookup(|key| match key {
            "OTEL_EXPORTER_OTLP_ENDPOINT" => Some("http://collector:4317".into()),
            "OTEL_SERVICE_NAME" => Some("".into()),
            _ => None,
        });
        assert_eq!(settings.endpoint, "http://collector:4317");
        assert_eq!(settings.service_name, "bookshelf", "blank falls back");
    }

    #[cfg(feature = "telemetry")]
    #[tokio::test(flavor = "multi_thread")]
    async fn otlp_provider_builds_without_a_collector() {
        let settings = OtelSettings::from_lookup(|_| None);
        // The tonic channel connects lazily, so no collector needs to be up.
        assert!(otel::provider(&settings).is_ok());
    }

    #[cfg(feature = "telemetry")]
    #[tokio::test(flavor = "multi_thread")]
    async fn otlp_rejects_malformed_endpoint() {
        let settings = OtelSettings {
            endpoint: "not a uri".into(),
            service_name: "bookshelf".into(),
        };
        assert!(otel::provider(&settings).is_err());
    }
}

//! Logging initialisation and the OpenTelemetry tracer provider.

use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, TracerProviderBuilder};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line (production).
    #[default]
    Json,
    /// Human-readable multi-line output (development).
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format {0:?} (expected \"json\" or \"pretty\")")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        })
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
///
/// Only the first call has an effect; a subscriber installed elsewhere (tests)
/// is left in place.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(tfmt::layer().json().flatten_event(true).with_current_span(true))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(tfmt::layer().pretty())
                .try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Instrumentation scope of every span this crate starts.
pub const TRACER_NAME: &str = "taskrelay";

/// Tracer provider settings. The provider is passed around explicitly and
/// never installed as the global one.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub service_version: String,
    /// Share of new root traces that are sampled, clamped to `0.0..=1.0`.
    /// Children follow the sampled flag of a propagated parent.
    pub sampling_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "taskrelay".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            sampling_rate: 1.0,
        }
    }
}

impl TracingConfig {
    pub fn sampler(&self) -> Sampler {
        let root = if self.sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.sampling_rate <= 0.0 || self.sampling_rate.is_nan() {
            Sampler::AlwaysOff
        } else {
            Sampler::TraceIdRatioBased(self.sampling_rate)
        };
        Sampler::ParentBased(Box::new(root))
    }

    /// Builder with resource and sampler set; callers add exporters.
    pub fn provider_builder(&self) -> TracerProviderBuilder {
        let resource = Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([KeyValue::new("service.version", self.service_version.clone())])
            .build();
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_sampler(self.sampler())
    }

    pub fn build_provider(&self) -> SdkTracerProvider {
        self.provider_builder().build()
    }
}

pub fn tracer(provider: &SdkTracerProvider) -> SdkTracer {
    provider.tracer(TRACER_NAME)
}

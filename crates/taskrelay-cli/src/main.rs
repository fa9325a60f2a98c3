//! `taskrelay`: API server and delivery workers over one in-memory broker.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use taskrelay_core::api::{self, ApiState};
use taskrelay_core::delivery::WorkerConfig;
use taskrelay_core::domain::QueueName;
use taskrelay_core::gateway::{GatewayConfig, TaskGateway};
use taskrelay_core::ports::{Clock, SystemClock, UlidGenerator};
use taskrelay_core::queue::{
    DEFAULT_MAX_ARCHIVED, InMemoryBroker, InMemoryBrokerConfig, RetryPolicy,
};
use taskrelay_core::telemetry::{self, LogFormat, SdkTracerProvider, TracingConfig, init_logging};

#[derive(Debug, Parser)]
#[command(name = "taskrelay")]
#[command(about = "Queue HTTP tasks and forward them to a target endpoint")]
#[command(version)]
struct Args {
    /// Log output format (`json` or `pretty`).
    #[arg(long, env = "LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the task API and the delivery workers.
    Serve(ServeArgs),
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    /// Port the task API listens on.
    #[arg(long, env = "API_PORT", default_value = "8080")]
    port: u16,

    /// Every task is POSTed to this URL.
    #[arg(long, env = "TARGET_ENDPOINT")]
    target_endpoint: String,

    /// Retries after the first delivery attempt.
    #[arg(long, env = "RETRY_COUNT", default_value = "3")]
    retry_count: u32,

    /// Concurrent deliveries.
    #[arg(long, env = "WORKER_CONCURRENCY", default_value = "10")]
    concurrency: usize,

    /// Queue used by routes that do not name one.
    #[arg(long, env = "QUEUE_NAME", default_value = "default")]
    queue_name: String,

    /// Comma-separated queues the workers lease from (defaults to QUEUE_NAME).
    #[arg(long, env = "WORKER_QUEUES", value_delimiter = ',')]
    worker_queues: Vec<String>,

    /// Timeout of one outbound delivery, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// First retry delay in seconds; doubles on every retry.
    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value = "10")]
    retry_base_delay_secs: u64,

    /// An active task without a report for this long is redelivered.
    #[arg(long, env = "LEASE_TIMEOUT_SECS", default_value = "60")]
    lease_timeout_secs: u64,

    /// Time in-flight deliveries get after a shutdown signal.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "10")]
    shutdown_grace_secs: u64,

    /// How long archived (dead) tasks stay inspectable and deletable.
    #[arg(long, env = "ARCHIVED_RETENTION_SECS", default_value = "7776000")]
    archived_retention_secs: u64,

    /// Per-queue cap on archived tasks.
    #[arg(long, env = "MAX_ARCHIVED", default_value_t = DEFAULT_MAX_ARCHIVED)]
    max_archived: usize,

    #[arg(long, env = "SERVICE_NAME", default_value = "taskrelay")]
    service_name: String,

    /// Share of new root traces that are sampled (0.0 to 1.0).
    #[arg(long, env = "OTEL_TRACES_SAMPLER_ARG", default_value = "1.0")]
    trace_sampling_rate: f64,

    /// OTLP gRPC endpoint for spans. Needs the `otlp` feature.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format);

    match args.command {
        Commands::Serve(serve) => run_serve(serve).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let default_queue = QueueName::parse(args.queue_name.trim()).context("invalid QUEUE_NAME")?;
    let worker_queues = parse_queues(&args.worker_queues, &default_queue)?;

    let request_timeout = Duration::from_secs(args.request_timeout_secs);
    let lease_timeout = Duration::from_secs(args.lease_timeout_secs);
    if lease_timeout <= request_timeout {
        bail!(
            "LEASE_TIMEOUT_SECS ({}) must be greater than REQUEST_TIMEOUT_SECS ({})",
            args.lease_timeout_secs,
            args.request_timeout_secs
        );
    }

    // broker は gateway と worker で共有する
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    let broker = InMemoryBroker::new(
        InMemoryBrokerConfig {
            retry_policy: RetryPolicy::exponential(Duration::from_secs(args.retry_base_delay_secs)),
            lease_timeout,
            archived_retention: Duration::from_secs(args.archived_retention_secs),
            max_archived: args.max_archived,
            ..InMemoryBrokerConfig::default()
        },
        Arc::clone(&clock),
        ids,
    );

    let gateway = TaskGateway::new(
        Arc::new(broker.clone()),
        clock,
        GatewayConfig {
            default_queue,
            max_retry: args.retry_count,
            ..GatewayConfig::default()
        },
    );

    let tracing_config = TracingConfig {
        service_name: args.service_name.clone(),
        sampling_rate: args.trace_sampling_rate,
        ..TracingConfig::default()
    };
    let provider = build_tracer_provider(&tracing_config, args.otlp_endpoint.as_deref())?;
    let tracer = telemetry::tracer(&provider);
    api::init_metrics().context("failed to install metrics recorder")?;

    let worker_config = WorkerConfig {
        target_endpoint: args.target_endpoint,
        request_timeout,
        concurrency: args.concurrency,
        queues: worker_queues,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
    };
    let pool = worker_config
        .start(Arc::new(broker.clone()), tracer.clone())
        .context("failed to start delivery workers")?;

    let app = api::router(ApiState::new(
        Arc::new(gateway),
        Arc::new(broker.clone()),
        tracer,
    ));
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        event = "server.start",
        service = %args.service_name,
        addr = %addr,
        target = %worker_config.target_endpoint,
        "task api listening"
    );

    // signal を受けた時点で worker の新規 lease を止め、API の drain と並行させる
    let stop_workers = pool.shutdown_handle();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stop_workers.request();
        })
        .await;

    let report = pool.shutdown(worker_config.shutdown_grace).await;
    broker.close().await;
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "tracer provider shutdown failed");
    }
    tracing::info!(
        event = "server.stop",
        finished = report.finished,
        aborted = report.aborted,
        "shutdown complete"
    );

    served.context("api server failed")
}

#[cfg(feature = "otlp")]
fn build_tracer_provider(
    config: &TracingConfig,
    endpoint: Option<&str>,
) -> anyhow::Result<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig;

    let Some(endpoint) = endpoint else {
        return Ok(config.build_provider());
    };
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.to_string())
        .build()
        .context("failed to build OTLP span exporter")?;
    tracing::info!(event = "tracing.export", endpoint, "exporting spans over OTLP");
    Ok(config.provider_builder().with_batch_exporter(exporter).build())
}

#[cfg(not(feature = "otlp"))]
fn build_tracer_provider(
    config: &TracingConfig,
    endpoint: Option<&str>,
) -> anyhow::Result<SdkTracerProvider> {
    if let Some(endpoint) = endpoint {
        tracing::warn!(
            endpoint,
            "OTEL_EXPORTER_OTLP_ENDPOINT is set but this build lacks the otlp feature; spans are not exported"
        );
    }
    Ok(config.build_provider())
}

fn parse_queues(raw: &[String], default_queue: &QueueName) -> anyhow::Result<Vec<QueueName>> {
    let mut queues = Vec::new();
    for name in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        queues.push(QueueName::parse(name).context("invalid WORKER_QUEUES")?);
    }
    if queues.is_empty() {
        queues.push(default_queue.clone());
    }
    Ok(queues)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(signal = "SIGINT", "received shutdown signal"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "received shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_queues_default_to_queue_name() {
        let default_queue = QueueName::parse("emails").unwrap();
        let queues = parse_queues(&[], &default_queue).unwrap();
        assert_eq!(queues, vec![default_queue.clone()]);

        let raw = vec!["a".to_string(), " b ".to_string(), String::new()];
        let queues = parse_queues(&raw, &default_queue).unwrap();
        assert_eq!(
            queues,
            vec![QueueName::parse("a").unwrap(), QueueName::parse("b").unwrap()]
        );
    }

    #[test]
    fn serve_reads_flags() {
        let args = Args::try_parse_from([
            "taskrelay",
            "--log-format",
            "pretty",
            "serve",
            "--target-endpoint",
            "http://localhost:9000/hook",
            "--worker-queues",
            "a,b",
        ])
        .unwrap();
        assert_eq!(args.log_format, LogFormat::Pretty);
        let Commands::Serve(serve) = args.command;
        assert_eq!(serve.port, 8080);
        assert_eq!(serve.retry_count, 3);
        assert_eq!(serve.worker_queues, vec!["a", "b"]);
        assert_eq!(serve.max_archived, DEFAULT_MAX_ARCHIVED);
        assert_eq!(serve.archived_retention_secs, 90 * 86_400);
        assert_eq!(serve.trace_sampling_rate, 1.0);
        assert!(serve.otlp_endpoint.is_none());
    }

    #[test]
    fn provider_without_endpoint_builds_locally() {
        let provider = build_tracer_provider(&TracingConfig::default(), None).unwrap();
        provider.shutdown().unwrap();
    }
}

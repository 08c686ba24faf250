//! Chubao Operator
//!
//! Runs the ChubaoCluster controller next to a health server and a
//! Prometheus metrics endpoint.

use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chubao_operator::dashboards::{self, Dashboards};
use chubao_operator::{
    run_controller, Context, Error, KubeEventSink, KubeStore, OperatorConfig, ReconcileMetrics,
    Result, WorkloadHealthReporter,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chubao Operator - ChubaoFS clusters on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Clusters reconciled in parallel
    #[arg(long, env = "CONCURRENCY", default_value = "4")]
    concurrency: u16,

    /// Requeue interval of a connected cluster, in seconds
    #[arg(long, env = "RESYNC_SECS", default_value = "300")]
    resync_secs: u64,

    /// Requeue interval while workloads come up, in seconds
    #[arg(long, env = "PENDING_REQUEUE_SECS", default_value = "15")]
    pending_requeue_secs: u64,

    /// Base URL serving dashboard.yml and chubaofs.json for Grafana
    #[arg(long, env = "DASHBOARD_BASE_URL")]
    dashboard_base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace.clone(),
            concurrency: self.concurrency,
            resync_interval: Duration::from_secs(self.resync_secs),
            pending_requeue: Duration::from_secs(self.pending_requeue_secs),
            dashboard_base_url: self.dashboard_base_url.clone(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.operator_config();
    info!("Starting Chubao Operator");
    info!("  Version: {}", chubao_operator::VERSION);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("*"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  Resync: {:?}", config.resync_interval);

    let registry = Registry::new();
    let metrics = ReconcileMetrics::register(&registry)?;
    let ready = Arc::new(AtomicBool::new(false));

    let health_addr = parse_addr(&args.health_addr, "health")?;
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let dashboards = load_dashboards(config.dashboard_base_url.as_deref()).await;

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client.clone()));
    let ctx = Context::new(
        store.clone(),
        Arc::new(WorkloadHealthReporter::new(store)),
        Arc::new(KubeEventSink::new(client.clone())),
        config,
    )
    .with_dashboards(dashboards)
    .with_metrics(metrics);

    ready.store(true, Ordering::SeqCst);
    run_controller(client, Arc::new(ctx)).await;

    info!("Operator shutdown complete");
    Ok(())
}

/// Grafana still starts without fetched dashboards, so a failed fetch is
/// logged and skipped
async fn load_dashboards(base_url: Option<&str>) -> Dashboards {
    let Some(base_url) = base_url else {
        return Dashboards::new();
    };
    let client = reqwest::Client::new();
    match dashboards::fetch(&client, base_url).await {
        Ok(dashboards) => dashboards,
        Err(e) => {
            warn!(error = %e, base_url = %base_url, "Dashboard fetch failed, continuing without");
            Dashboards::new()
        }
    }
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => args.log_level.to_lowercase(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn,kube=info,tower=warn", level)));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "starting"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: Registry) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok::<_, std::convert::Infallible>(text_response(
                            StatusCode::NOT_FOUND,
                            "not found",
                        ));
                    }

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    let response = match encoder.encode(&registry.gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(value) = header::HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failed")
                        }
                    };
                    Ok(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

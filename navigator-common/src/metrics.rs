//! Prometheus metrics endpoint shared by the Manager and the Edge: a
//! tower layer recording request count/latency/in-flight for whatever
//! axum routes are mounted, plus a `/metrics` route rendering the
//! process-wide recorder.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::{Router, routing::get};
use http::{Request, StatusCode};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tower::{Layer, Service};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};

use futures_util::future::BoxFuture;

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Spawns an HTTP server exposing `/healthz`, `/readyz`, `/metrics` on
/// `port`, tagged with `component` (`"manager"` or `"edge"`). No-op when
/// `port` is `None` (metrics are an optional ambient concern, never
/// required to run either process).
pub fn maybe_spawn_metrics_server(port: Option<u16>, component: &'static str) {
    let Some(port) = port else {
        return;
    };
    let handle = install_recorder_once().clone();
    tokio::spawn(run_metrics_server(port, component, handle));
}

async fn run_metrics_server(port: u16, component: &'static str, handle: PrometheusHandle) {
    let metrics_route = {
        let handle = handle.clone();
        get(move || async move { handle.render() })
    };
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", metrics_route)
        .layer(MetricsLayer::new(component));
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };
    tracing::info!("{}{}", "starting metrics server on ".green(), addr.green());
    let started = Instant::now();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "metrics server exited with error");
    }
    tracing::info!(uptime = ?started.elapsed(), "metrics server stopped gracefully");
}

/// Tower layer recording request count, latency histogram, and in-flight
/// gauge, labeled by the owning component (manager/edge) plus route.
#[derive(Clone)]
pub struct MetricsLayer {
    classifier: SharedClassifier<ServerErrorsAsFailures>,
    component: &'static str,
}

impl MetricsLayer {
    pub fn new(component: &'static str) -> Self {
        Self {
            classifier: SharedClassifier::new(ServerErrorsAsFailures::new()),
            component,
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            classifier: self.classifier.clone(),
            component: self.component,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    component: &'static str,
    #[allow(dead_code)]
    classifier: SharedClassifier<ServerErrorsAsFailures>,
}

impl<S, B> Service<Request<B>> for MetricsService<S>
where
    S: Service<Request<B>, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let start = Instant::now();
        let method = req.method().as_str().to_owned();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_owned())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let component = self.component;
        let mut svc = self.inner.clone();
        let fut = svc.call(req);

        Box::pin(async move {
            let in_flight = gauge!("navigator_http_in_flight_requests", "component" => component);
            in_flight.increment(1);

            let res = fut.await;
            let elapsed = start.elapsed().as_secs_f64();
            let status = match &res {
                Ok(resp) => resp.status(),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };

            histogram!(
                "navigator_http_request_duration_seconds",
                "method" => method.clone(),
                "route" => route.clone(),
                "status" => status.as_u16().to_string(),
                "component" => component
            )
            .record(elapsed);

            counter!(
                "navigator_http_requests_total",
                "method" => method,
                "route" => route,
                "status" => status.as_u16().to_string(),
                "component" => component
            )
            .increment(1);

            in_flight.decrement(1);
            res
        })
    }
}

pub fn set_active_sessions(count: usize) {
    gauge!("navigator_manager_active_sessions").set(count as f64);
}

pub fn set_pending_requests(count: usize) {
    gauge!("navigator_manager_pending_requests").set(count as f64);
}

pub fn record_snapshot_published() {
    counter!("navigator_edge_snapshots_published_total").increment(1);
}

pub fn record_snapshot_dropped() {
    counter!("navigator_edge_snapshots_dropped_total").increment(1);
}

pub fn record_enrichment_soft_failure(field: &str) {
    counter!("navigator_edge_enrichment_soft_failures_total", "field" => field.to_string())
        .increment(1);
}

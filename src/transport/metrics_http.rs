// src/transport/metrics_http.rs

//! The Prometheus scrape endpoint (spec.md §6.4 constants / ambient
//! observability stack). Grounded in the teacher's `server/metrics_server.rs`
//! axum router, stripped of the teacher's server-state gauges since this
//! daemon's metrics (`core::metrics`) are process-global `lazy_static`s, not
//! state pulled from a shared handle.

use axum::Router;
use axum::response::IntoResponse;
use axum::routing::get;
use std::net::SocketAddr;

async fn metrics_handler() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        crate::core::metrics::gather_metrics(),
    )
}

/// Serves `/metrics` on `bind_addr` until the process exits. Spawned as a
/// background task; a bind failure is logged and the task simply exits,
/// since losing the scrape endpoint is not fatal to the daemon's purpose.
pub fn spawn(bind_addr: SocketAddr) {
    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));
        match tokio::net::TcpListener::bind(bind_addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "metrics server exited");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, addr = %bind_addr, "failed to bind metrics listener");
            }
        }
    });
}

//! Liveness endpoint for hosting-platform health checks.
//!
//! One route, one fixed body, status 200 always. Runs on the main task,
//! independent of the poll loop; the two share nothing but the log sink.

use axum::Router;
use axum::routing::get;
use tracing::info;

/// Fixed body returned on every probe.
pub const STATUS_BODY: &str = "auto-reply worker is running";

/// Build the liveness router: `GET /` → 200 + fixed text.
pub fn liveness_routes() -> Router {
    Router::new().route("/", get(|| async { STATUS_BODY }))
}

/// Bind all interfaces on `port` and serve until process exit.
pub async fn serve(port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "liveness endpoint listening");
    axum::serve(listener, liveness_routes()).await
}

// ── Tests ───────────────────────────────────────────────────────────

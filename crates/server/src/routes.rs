//! Route configuration.

use crate::auth::trace_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_routes = Router::new()
        // Upload protocol: bulk, generate-client-token and upload-completed
        .route("/upload", post(handlers::upload_event))
        // Direct uploads with a client token, and raw reads
        .route(
            "/blob/{*key}",
            get(handlers::get_blob).put(handlers::put_blob),
        );

    let artifact_routes = Router::new()
        .route(
            "/artifact/view/{owner}/{repo}/{alias_type}/{identifier}/{artifact_name}",
            get(handlers::view_artifact),
        )
        .route(
            "/artifact/view/{owner}/{repo}/{alias_type}/{identifier}/{artifact_name}/{*filepath}",
            get(handlers::view_artifact),
        )
        .route(
            "/artifact/blob/{owner}/{repo}/{*rest}",
            get(handlers::view_upload),
        )
        .route(
            "/artifact/entries/{artifact_id}/{*entry_name}",
            put(handlers::put_artifact_entry),
        );

    let mut router = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/health", get(handlers::health_check))
        .route("/github/events", post(handlers::github_events))
        .merge(upload_routes)
        .merge(artifact_routes);

    // SECURITY: when enabled, /metrics must be network-restricted to the
    // Prometheus scraper. See crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost first: TraceLayer -> trace id span -> handler
    router
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

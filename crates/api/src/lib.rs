//! HTTP API for the order fulfillment workflow engine.
//!
//! Submits orders to a [`PipelineRunner`], exposes the persisted order,
//! its audit trail and payments, and lets operators resume or cancel
//! pipelines. Structured logging comes from tracing, metrics from
//! Prometheus.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow::{FulfillmentActivities, PipelineRunner};

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, A>(runner: PipelineRunner<S, A>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let state = Arc::new(AppState::new(runner));

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, A>))
        .route("/orders", post(routes::orders::create::<S, A>))
        .route("/orders/{id}", get(routes::orders::get::<S, A>))
        .route("/orders/{id}/events", get(routes::orders::events::<S, A>))
        .route("/orders/{id}/payments", get(routes::orders::payments::<S, A>))
        .route("/orders/{id}/resume", post(routes::orders::resume::<S, A>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S, A>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

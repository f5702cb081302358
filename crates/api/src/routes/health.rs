//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderStore;
use serde::Serialize;
use workflow::FulfillmentActivities;

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub running_pipelines: usize,
}

/// GET /health: liveness plus the number of pipelines in flight.
pub async fn check<S, A>(State(state): State<Arc<AppState<S, A>>>) -> Json<HealthResponse>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    Json(HealthResponse {
        status: "ok",
        running_pipelines: state.runner.running_count(),
    })
}

//! Order submission, inspection and pipeline control endpoints.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Address, Order, OrderItem, OrderState, OrderSubmission, Payment};
use order_store::{Event, OrderStore, OrderStoreExt};
use serde::{Deserialize, Serialize};
use workflow::{FulfillmentActivities, PipelineHandle, PipelineRunner};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, A> {
    pub runner: PipelineRunner<S, A>,
}

impl<S, A> AppState<S, A>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    pub fn new(runner: PipelineRunner<S, A>) -> Self {
        Self { runner }
    }

    fn store(&self) -> &S {
        self.runner.orchestrator().store()
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub address: serde_json::Value,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    #[serde(default)]
    pub sku: String,
    pub qty: i64,
}

impl From<CreateOrderRequest> for OrderSubmission {
    fn from(req: CreateOrderRequest) -> Self {
        OrderSubmission::new(
            req.items
                .into_iter()
                .map(|item| OrderItem::new(item.sku, item.qty))
                .collect(),
            Address::new(req.address),
        )
    }
}

/// `?wait=true` holds the response until the pipeline ends.
#[derive(Debug, Default, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub wait: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub state: OrderState,
    pub terminal: bool,
    pub running: bool,
    pub items: Vec<OrderItem>,
    pub address: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(order: Order, running: bool) -> Self {
        Self {
            id: order.id(),
            state: order.state(),
            terminal: order.is_terminal(),
            running,
            items: order.items().to_vec(),
            address: order.address().as_json().clone(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Serialize)]
pub struct PipelineAccepted {
    pub order_id: OrderId,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub order_id: OrderId,
    pub cancelled: bool,
}

// -- Handlers --

/// POST /orders: starts a pipeline for a new order.
#[tracing::instrument(skip(state, req))]
pub async fn create<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Query(params): Query<WaitParams>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Response, ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let handle = state.runner.submit(req.into())?;
    tracing::info!(order_id = %handle.order_id(), "order submitted");
    respond(handle, params.wait).await
}

/// GET /orders/{id}: the persisted order.
#[tracing::instrument(skip(state))]
pub async fn get<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = state
        .store()
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    let running = state.runner.is_running(order_id);
    Ok(Json(OrderResponse::new(order, running)))
}

/// GET /orders/{id}/events: the audit trail, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let order_id = parse_order_id(&id)?;
    state.store().require_order(order_id).await?;
    Ok(Json(state.store().get_events_for_order(order_id).await?))
}

/// GET /orders/{id}/payments
#[tracing::instrument(skip(state))]
pub async fn payments<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let order_id = parse_order_id(&id)?;
    state.store().require_order(order_id).await?;
    Ok(Json(state.store().get_payments_for_order(order_id).await?))
}

/// POST /orders/{id}/resume: drives a persisted order from its last
/// committed step.
#[tracing::instrument(skip(state))]
pub async fn resume<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(id): Path<String>,
    Query(params): Query<WaitParams>,
) -> Result<Response, ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let order_id = parse_order_id(&id)?;
    state.store().require_order(order_id).await?;

    let handle = state.runner.resume(order_id)?;
    respond(handle, params.wait).await
}

/// POST /orders/{id}/cancel: stops the order's running pipeline.
#[tracing::instrument(skip(state))]
pub async fn cancel<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    let order_id = parse_order_id(&id)?;
    if !state.runner.cancel(order_id) {
        return Err(ApiError::Conflict(format!(
            "No pipeline is running for order {id}"
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            order_id,
            cancelled: true,
        }),
    ))
}

async fn respond(handle: PipelineHandle, wait: bool) -> Result<Response, ApiError> {
    if !wait {
        let body = PipelineAccepted {
            order_id: handle.order_id(),
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let order = handle.wait().await?;
    Ok(Json(OrderResponse::new(order, false)).into_response())
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::from_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}

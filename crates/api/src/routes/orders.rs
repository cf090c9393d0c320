//! Order history and payment intent endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use domain::{Order, OrderId, ShippingInfo};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::identity::CurrentUser;
use crate::state::{AppState, Backend};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub page: usize,
    pub size: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub status: String,
    pub payment_status: String,
    pub payment_intent_ref: Option<String>,
    pub total_cents: i64,
    pub currency: String,
    pub items: Vec<OrderItemResponse>,
    pub shipping: ShippingInfo,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let items = order
            .items()
            .iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id.to_string(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
                subtotal_cents: item.subtotal().map(|m| m.cents()).unwrap_or_default(),
            })
            .collect();

        Self {
            id: order.id().to_string(),
            status: order.status().to_string(),
            payment_status: order.payment_status().to_string(),
            payment_intent_ref: order.payment_intent_ref().map(str::to_string),
            total_cents: order.total().cents(),
            currency: order.currency().code().to_string(),
            items,
            shipping: order.shipping().clone(),
            cancellation_reason: order.cancellation_reason().map(str::to_string),
            created_at: order.created_at(),
            paid_at: order.paid_at(),
        }
    }
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub page: usize,
    pub size: usize,
}

#[derive(Serialize)]
pub struct PaymentIntentResponse {
    pub order_id: String,
    pub intent_id: String,
    pub client_secret: String,
}

// -- Handlers --

/// GET /orders?page&size: the caller's orders, newest first.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn list<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let orders = state
        .orders
        .list_for_user(user.user_id, query.page, size)
        .await?;

    Ok(Json(OrderListResponse {
        orders: orders.iter().map(OrderResponse::from).collect(),
        page: query.page,
        size,
    }))
}

/// GET /orders/{id}: one of the caller's orders.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, order_id = %id))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_for_user(user.user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/payment-intent: create or reuse the order's intent.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, order_id = %id))]
pub async fn payment_intent<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PaymentIntentResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let handle = state.intents.ensure_intent(&user, order_id).await?;

    Ok(Json(PaymentIntentResponse {
        order_id: handle.order.id().to_string(),
        intent_id: handle.intent_id,
        client_secret: handle.client_secret,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}

//! Cart endpoints. Every handler acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Cart, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::identity::CurrentUser;
use crate::state::{AppState, Backend};

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: String,
    pub items: Vec<CartItemResponse>,
    pub item_count: usize,
    pub total_cents: i64,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        let items = cart
            .items()
            .map(|item| CartItemResponse {
                product_id: item.product_id.to_string(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price.cents(),
                subtotal_cents: item.subtotal().map(|m| m.cents()).unwrap_or_default(),
            })
            .collect();

        Self {
            user_id: cart.user_id().to_string(),
            items,
            item_count: cart.item_count(),
            total_cents: cart.total().cents(),
        }
    }
}

// -- Handlers --

/// GET /cart
#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get_cart(user.user_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/items: add units of a product.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, product_id = %req.product_id))]
pub async fn add_item<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_product_id(&req.product_id)?;
    let cart = state
        .carts
        .add_item(user.user_id, product_id, req.quantity)
        .await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// PUT /cart/items/{product_id}: replace a line's quantity.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, product_id = %product_id))]
pub async fn update_item<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<String>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let cart = state
        .carts
        .set_item_quantity(user.user_id, product_id, req.quantity)
        .await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart/items/{product_id}
#[tracing::instrument(skip_all, fields(user_id = %user.user_id, product_id = %product_id))]
pub async fn remove_item<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let cart = state.carts.remove_item(user.user_id, product_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart
#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn clear<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.clear(user.user_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("product_id is required".to_string()));
    }
    Ok(ProductId::new(trimmed))
}

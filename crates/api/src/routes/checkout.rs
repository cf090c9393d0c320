//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::ShippingInfo;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::identity::CurrentUser;
use crate::routes::orders::OrderResponse;
use crate::state::{AppState, Backend};

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub shipping: ShippingInfo,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub payment: Option<PaymentDetails>,
    pub payment_error: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentDetails {
    pub intent_id: String,
    pub client_secret: String,
}

/// POST /checkout: turn the caller's cart into an order and start payment.
///
/// The order is created even if the payment intent cannot be; the client
/// retries through `POST /orders/{id}/payment-intent`.
#[tracing::instrument(skip_all, fields(user_id = %user.user_id))]
pub async fn checkout<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let order = state.checkout.checkout(&user, req.shipping).await?;

    let response = match state.intents.ensure_intent(&user, order.id()).await {
        Ok(handle) => CheckoutResponse {
            order: OrderResponse::from(&handle.order),
            payment: Some(PaymentDetails {
                intent_id: handle.intent_id,
                client_secret: handle.client_secret,
            }),
            payment_error: None,
        },
        Err(e) => {
            tracing::warn!(
                order_id = %order.id(),
                error = %e,
                retryable = e.is_retryable(),
                "Order created without a payment intent"
            );
            metrics::counter!("checkout_payment_deferred_total").increment(1);
            CheckoutResponse {
                order: OrderResponse::from(&order),
                payment: None,
                payment_error: Some(e.to_string()),
            }
        }
    };

    Ok((StatusCode::CREATED, Json(response)))
}

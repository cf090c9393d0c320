//! Payment provider webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use payments::{PaymentError, ReconcileOutcome, SignatureError};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::{AppState, Backend};

pub const SIGNATURE_HEADER: &str = "webhook-signature";

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: ReconcileOutcome,
}

/// POST /webhooks/payments
///
/// Duplicates, ignored events and rejected anomalies are acknowledged with
/// 200 so the provider stops redelivering them. Transient failures answer
/// 503 and the provider retries.
pub async fn payments<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook delivered without a signature header");
            ApiError::Payment(PaymentError::InvalidSignature(
                SignatureError::MalformedHeader,
            ))
        })?;

    let outcome = state.reconciler.handle_event(&body, signature).await?;
    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}

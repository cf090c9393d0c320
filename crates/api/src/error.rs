//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{CartError, DomainError, OrderError};
use payments::{GatewayError, PaymentError};
use storage::StorageError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid identity headers.
    Unauthorized(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Payment or webhook error.
    Payment(PaymentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Payment(err) => payment_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Order(order_err) => match order_err {
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::InsufficientStock { .. }
            | OrderError::InvalidTransition { .. }
            | OrderError::IntentMismatch { .. } => StatusCode::CONFLICT,
            OrderError::EmptyCart
            | OrderError::InvalidShippingInfo { .. }
            | OrderError::AmountOverflow => StatusCode::BAD_REQUEST,
        },
        DomainError::Cart(cart_err) => match cart_err {
            CartError::OutOfStock { .. } => StatusCode::CONFLICT,
            CartError::ItemNotFound(_) => StatusCode::NOT_FOUND,
            CartError::InvalidQuantity(_)
            | CartError::UnknownProduct(_)
            | CartError::AmountOverflow => StatusCode::BAD_REQUEST,
        },
        DomainError::ConflictRetriesExhausted { .. }
        | DomainError::Storage(StorageError::ConcurrencyConflict { .. }) => StatusCode::CONFLICT,
        DomainError::Storage(StorageError::InsufficientStock { .. }) => StatusCode::CONFLICT,
        DomainError::Storage(StorageError::UnknownProduct(_)) => StatusCode::BAD_REQUEST,
        DomainError::Storage(StorageError::Database(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn payment_error_to_response(err: PaymentError) -> (StatusCode, String) {
    match err {
        // Signature details stay in the logs
        PaymentError::InvalidSignature(_) | PaymentError::MalformedEvent(_) => {
            (StatusCode::BAD_REQUEST, "invalid webhook payload".to_string())
        }
        PaymentError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        PaymentError::OrderNotPayable { .. } => (StatusCode::CONFLICT, err.to_string()),
        ref e if e.is_retryable() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        PaymentError::Gateway(GatewayError::InvalidRequest(_) | GatewayError::NotFound(_)) => {
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
        PaymentError::Domain(e) => domain_error_to_response(e),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}

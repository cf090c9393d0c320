//! Identity headers set by the upstream auth layer.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use domain::{AuthenticatedUser, UserId};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Extracts the caller's [`AuthenticatedUser`] from request headers.
///
/// `x-user-id` must hold a UUID; the email and name headers are optional.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl CurrentUser {
    fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let raw_id = header_str(headers, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing user identity".to_string()))?;
        let uuid = Uuid::parse_str(raw_id)
            .map_err(|_| ApiError::Unauthorized("invalid user identity".to_string()))?;

        let mut user = AuthenticatedUser::new(UserId::from_uuid(uuid));
        if let Some(email) = header_str(headers, USER_EMAIL_HEADER) {
            user = user.with_email(email);
        }
        if let Some(name) = header_str(headers, USER_NAME_HEADER) {
            user = user.with_full_name(name);
        }
        Ok(Self(user))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

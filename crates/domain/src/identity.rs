//! Authenticated principal supplied by the auth collaborator.

use common::UserId;
use serde::{Deserialize, Serialize};

/// The caller on whose behalf an operation runs.
///
/// Token validation happens upstream; this type only carries the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl AuthenticatedUser {
    /// Creates an identity with only a user ID.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            full_name: None,
        }
    }

    /// Sets the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the display name.
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }
}

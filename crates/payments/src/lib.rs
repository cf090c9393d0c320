//! Payment side of the checkout engine.
//!
//! This crate provides:
//! - PaymentGateway trait for the external payment provider, plus an
//!   in-memory implementation
//! - PaymentIntentService creating one intent per payable order
//! - WebhookVerifier and WebhookEvent for signed provider notifications
//! - PaymentReconciler applying webhooks to orders exactly once
//! - ReservationReaper expiring stock held by orders that were never paid

pub mod error;
pub mod gateway;
pub mod intents;
pub mod reaper;
pub mod reconciler;
pub mod webhook;

pub use error::{PaymentError, Result};
pub use gateway::{
    GatewayError, InMemoryPaymentGateway, IntentRequest, PaymentGateway, PaymentIntent,
};
pub use intents::{IntentHandle, PaymentIntentService};
pub use reaper::{RESERVATION_EXPIRED, ReservationReaper, SweepReport};
pub use reconciler::{DEFAULT_DEDUP_RETENTION, PaymentReconciler, ReconcileOutcome};
pub use webhook::{
    EventKind, EventObject, PaymentEvent, SignatureError, WebhookEvent, WebhookVerifier,
};

//! Webhook signature verification and event parsing.
//!
//! Signatures follow the `t=<unix>,v1=<hex>` scheme: the provider computes
//! HMAC-SHA256 over `"<t>.<body>"` with the shared secret. Several `v1`
//! entries may be present while a secret is being rotated.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::OrderId;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a webhook signature is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    MalformedHeader,

    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("timestamp {timestamp} is outside the {tolerance_secs}s tolerance")]
    TimestampOutOfTolerance { timestamp: i64, tolerance_secs: u64 },

    #[error("no signature matches the payload")]
    Mismatch,
}

/// Verifies webhook payloads against a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Verifies `payload` against the signature header using the current time.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, Utc::now())
    }

    /// Verifies `payload` against the signature header as of `now`.
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let parsed = SignatureHeader::parse(header)?;

        let skew = now.timestamp().abs_diff(parsed.timestamp);
        if skew > self.tolerance.as_secs() {
            return Err(SignatureError::TimestampOutOfTolerance {
                timestamp: parsed.timestamp,
                tolerance_secs: self.tolerance.as_secs(),
            });
        }

        for candidate in &parsed.signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mac = self.mac(parsed.timestamp, payload)?;
            // verify_slice compares in constant time
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(SignatureError::Mismatch)
    }

    /// Produces a signature header for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::Mismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

impl<'a> SignatureHeader<'a> {
    fn parse(header: &'a str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(SignatureError::MalformedHeader)?;
            match key {
                "t" => {
                    let ts = value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?;
                    timestamp = Some(ts);
                }
                "v1" => signatures.push(value),
                // Other schemes (v0, ...) are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// The kinds of provider event the reconciler understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PaymentSucceeded,
    PaymentFailed,
    ChargeRefunded,
    Unknown(String),
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" | "payment_succeeded" => EventKind::PaymentSucceeded,
            "payment_intent.payment_failed" | "payment_failed" => EventKind::PaymentFailed,
            "charge.refunded" | "charge_refunded" => EventKind::ChargeRefunded,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

/// A provider webhook event envelope.
///
/// The object is kept as raw JSON until the event type is known, since
/// events the reconciler does not handle carry arbitrary object shapes.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: serde_json::Value,
}

/// A payment intent, or a charge for refunds.
#[derive(Debug, Clone, Deserialize)]
pub struct EventObject {
    pub id: String,
    /// Set on charge objects.
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

/// An event decoded far enough to act on.
#[derive(Debug, Clone)]
pub enum PaymentEvent {
    Succeeded(EventObject),
    Failed(EventObject),
    Refunded(EventObject),
    Unknown(String),
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }

    /// Decodes the object for the event types the reconciler handles.
    ///
    /// Unknown types never fail, whatever their object looks like.
    pub fn decode(&self) -> Result<PaymentEvent, serde_json::Error> {
        let object = || EventObject::deserialize(&self.data.object);
        Ok(match self.kind() {
            EventKind::PaymentSucceeded => PaymentEvent::Succeeded(object()?),
            EventKind::PaymentFailed => PaymentEvent::Failed(object()?),
            EventKind::ChargeRefunded => PaymentEvent::Refunded(object()?),
            EventKind::Unknown(event_type) => PaymentEvent::Unknown(event_type),
        })
    }
}

impl EventObject {
    /// The payment intent the object is about: the charge's
    /// `payment_intent`, otherwise the object itself.
    pub fn intent_id(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }

    /// Order ID from the metadata (`order_id`, or legacy `orderId`).
    pub fn order_id(&self) -> Option<OrderId> {
        self.metadata
            .get("order_id")
            .or_else(|| self.metadata.get("orderId"))
            .and_then(|id| OrderId::parse(id).ok())
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", Duration::from_secs(300))
    }

    #[test]
    fn test_sign_then_verify() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(b"{\"id\":\"evt_1\"}", now.timestamp()).unwrap();

        assert!(header.starts_with(&format!("t={},v1=", now.timestamp())));
        assert_eq!(v.verify_at(b"{\"id\":\"evt_1\"}", &header, now), Ok(()));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(b"{\"amount\":100}", now.timestamp()).unwrap();

        assert_eq!(
            v.verify_at(b"{\"amount\":999}", &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let now = Utc::now();
        let header = WebhookVerifier::new("other", Duration::from_secs(300))
            .sign(b"body", now.timestamp())
            .unwrap();

        assert_eq!(
            verifier().verify_at(b"body", &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let v = verifier();
        let now = Utc::now();
        let good = v.sign(b"body", now.timestamp()).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={good_sig}", now.timestamp());

        assert_eq!(v.verify_at(b"body", &header, now), Ok(()));
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(b"body", now.timestamp() - 301).unwrap();

        assert!(matches!(
            v.verify_at(b"body", &header, now),
            Err(SignatureError::TimestampOutOfTolerance { .. })
        ));
    }

    #[test]
    fn test_malformed_headers() {
        let v = verifier();
        let now = Utc::now();

        assert_eq!(
            v.verify_at(b"body", "garbage", now),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            v.verify_at(b"body", "v1=abcd", now),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            v.verify_at(b"body", &format!("t={}", now.timestamp()), now),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            v.verify_at(b"body", "t=yesterday,v1=abcd", now),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", verifier());
        assert!(!debug.contains("whsec_test"));
    }

    #[test]
    fn test_event_kinds_accept_both_spellings() {
        assert_eq!(
            EventKind::from_type("payment_intent.succeeded"),
            EventKind::PaymentSucceeded
        );
        assert_eq!(
            EventKind::from_type("payment_failed"),
            EventKind::PaymentFailed
        );
        assert_eq!(
            EventKind::from_type("charge_refunded"),
            EventKind::ChargeRefunded
        );
        assert_eq!(
            EventKind::from_type("customer.created"),
            EventKind::Unknown("customer.created".to_string())
        );
    }

    #[test]
    fn test_parse_payment_event() {
        let order_id = OrderId::new();
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "pi_1",
                "metadata": {"order_id": order_id.to_string()},
                "last_payment_error": {"message": "card declined"}
            }}
        });

        let event = WebhookEvent::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::PaymentFailed);

        let PaymentEvent::Failed(object) = event.decode().unwrap() else {
            panic!("expected a failed payment event");
        };
        assert_eq!(object.intent_id(), "pi_1");
        assert_eq!(object.order_id(), Some(order_id));
        assert_eq!(object.failure_message(), Some("card declined"));
    }

    #[test]
    fn test_refund_event_uses_charge_intent_and_legacy_key() {
        let order_id = OrderId::new();
        let payload = serde_json::json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_1",
                "payment_intent": "pi_9",
                "metadata": {"orderId": order_id.to_string()}
            }}
        });

        let event = WebhookEvent::parse(payload.to_string().as_bytes()).unwrap();

        let PaymentEvent::Refunded(object) = event.decode().unwrap() else {
            panic!("expected a refund event");
        };
        assert_eq!(object.intent_id(), "pi_9");
        assert_eq!(object.order_id(), Some(order_id));
    }

    #[test]
    fn test_unknown_event_with_foreign_object_decodes() {
        let payload = serde_json::json!({
            "id": "evt_balance",
            "type": "balance.available",
            "data": {"object": {"object": "balance", "available": [], "pending": []}}
        });

        let event = WebhookEvent::parse(payload.to_string().as_bytes()).unwrap();

        assert!(matches!(
            event.decode().unwrap(),
            PaymentEvent::Unknown(t) if t == "balance.available"
        ));
    }

    #[test]
    fn test_known_event_without_object_id_is_malformed() {
        let payload = serde_json::json!({
            "id": "evt_3",
            "type": "payment_intent.succeeded",
            "data": {"object": {"metadata": {}}}
        });

        let event = WebhookEvent::parse(payload.to_string().as_bytes()).unwrap();

        assert!(event.decode().is_err());
    }

    #[test]
    fn test_parse_rejects_non_events() {
        assert!(WebhookEvent::parse(b"not json").is_err());
        assert!(WebhookEvent::parse(b"{\"id\":\"evt\"}").is_err());
    }
}

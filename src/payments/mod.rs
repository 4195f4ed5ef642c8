//! Payment processor seam.
//!
//! The processor is the source of truth for what was charged: the order
//! workflow only ever reads amounts, currency and status from a
//! [`PaymentAuthorization`] retrieved through [`PaymentGateway`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod currency;
pub mod stripe;

pub use stripe::{StripeConfig, StripeGateway};

/// Lifecycle state of a payment authorization as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthorizationStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    /// Any status this service does not know; never treated as settled.
    #[serde(other)]
    Unknown,
}

impl AuthorizationStatus {
    pub fn is_settled(self) -> bool {
        self == Self::Succeeded
    }
}

/// Processor-side record of a payment attempt. Read-only for this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub id: String,
    /// Amount in minor units (cents for USD)
    pub amount: i64,
    pub currency: String,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub livemode: bool,
}

/// Parameters for a new payment authorization
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAuthorization {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// The processor has no record of the requested authorization
    NotFound,
    /// The processor answered and refused the request
    Rejected,
    /// Transport failure, timeout or processor-side outage
    Unavailable,
    /// The processor answered with something we could not parse
    InvalidResponse,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    /// Processor error code, e.g. `resource_missing`
    pub code: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code,
        }
    }

    pub fn not_found(authorization_id: &str) -> Self {
        Self::new(
            GatewayErrorKind::NotFound,
            format!("No such payment authorization: {}", authorization_id),
            Some("resource_missing".to_string()),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unavailable, message, None)
    }

    pub fn rejected(message: impl Into<String>, code: Option<String>) -> Self {
        Self::new(GatewayErrorKind::Rejected, message, code)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidResponse, message, None)
    }
}

/// Client for the external payment processor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an authorization the client completes with its secret.
    async fn create_authorization(
        &self,
        request: CreateAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError>;

    /// Fetches the current state of an authorization.
    async fn retrieve_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<PaymentAuthorization, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_deserializes_and_is_not_settled() {
        let auth: PaymentAuthorization = serde_json::from_value(serde_json::json!({
            "id": "pi_1",
            "amount": 100,
            "currency": "usd",
            "status": "some_future_state"
        }))
        .unwrap();
        assert_eq!(auth.status, AuthorizationStatus::Unknown);
        assert!(!auth.status.is_settled());
        assert!(auth.payment_method_types.is_empty());
    }

    #[test]
    fn status_display_matches_wire_name() {
        assert_eq!(
            AuthorizationStatus::RequiresPaymentMethod.to_string(),
            "requires_payment_method"
        );
        assert!(AuthorizationStatus::Succeeded.is_settled());
    }
}

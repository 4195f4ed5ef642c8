use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::payments::{GatewayError, GatewayErrorKind};
use crate::services::coupons::CouponRejection;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `payment_not_settled`)
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Payment authorization id is required")]
    MissingAuthorization,

    #[error("Shipping address is incomplete: missing {0}")]
    InvalidShippingAddress(String),

    #[error("Invalid order total: {0}")]
    InvalidTotal(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Payment not successful (status: {status})")]
    PaymentNotSettled { status: String },

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Order could not be saved for payment {authorization_id}")]
    OrderPersistence {
        authorization_id: String,
        #[source]
        source: sea_orm::error::DbErr,
    },

    #[error("{0}")]
    CouponRejected(#[from] CouponRejection),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::MissingAuthorization
            | Self::InvalidShippingAddress(_)
            | Self::InvalidTotal(_)
            | Self::InvalidAmount(_)
            | Self::PaymentNotSettled { .. } => StatusCode::BAD_REQUEST,
            Self::Gateway(err) => match err.kind {
                GatewayErrorKind::NotFound => StatusCode::NOT_FOUND,
                GatewayErrorKind::Rejected
                | GatewayErrorKind::Unavailable
                | GatewayErrorKind::InvalidResponse => StatusCode::BAD_GATEWAY,
            },
            Self::CouponRejected(rejection) => rejection.status_code(),
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_)
            | Self::OrderPersistence { .. }
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short error code carried in the `error` field of the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::MissingAuthorization => "payment_intent_required",
            Self::InvalidShippingAddress(_) => "invalid_shipping_address",
            Self::InvalidTotal(_) => "invalid_total",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::PaymentNotSettled { .. } => "payment_not_settled",
            Self::Gateway(err) => match err.kind {
                GatewayErrorKind::NotFound => "authorization_not_found",
                GatewayErrorKind::Unavailable => "gateway_unavailable",
                GatewayErrorKind::Rejected | GatewayErrorKind::InvalidResponse => {
                    "gateway_error"
                }
            },
            Self::OrderPersistence { .. } => "order_persistence_failed",
            Self::CouponRejected(rejection) => rejection.code(),
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::OrderPersistence { .. } => {
                "Payment received but the order could not be recorded. Please contact support with your payment reference."
                    .to_string()
            }
            Self::Gateway(err) => match err.kind {
                GatewayErrorKind::Unavailable => {
                    "Payment provider is unreachable, please retry shortly".to_string()
                }
                _ => err.message.clone(),
            },
            Self::PaymentNotSettled { .. } => "Payment not successful".to_string(),
            Self::CouponRejected(rejection) => rejection.to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        error_code: Option<String>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error".to_string(), msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found".to_string(), msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                "Unauthorized".to_string(),
            ),
            ApiError::BadRequest {
                message,
                error_code,
            } => (
                StatusCode::BAD_REQUEST,
                error_code.unwrap_or_else(|| "bad_request".to_string()),
                message,
            ),
        };

        let error_response = ErrorResponse {
            error: code,
            message,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

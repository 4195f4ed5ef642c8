use crate::errors::ApiError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Body for endpoints that only report what happened
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Validate)]
    struct Probe {
        #[validate(range(min = 1))]
        quantity: i32,
    }

    #[test]
    fn validate_input_maps_to_validation_error() {
        let probe: Probe = serde_json::from_str(r#"{"quantity":0}"#).unwrap();
        let err = validate_input(&probe).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(msg) if msg.starts_with("Validation failed")));
    }

    #[test]
    fn created_response_uses_201() {
        let response = created_response(MessageResponse::new("ok"));
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}

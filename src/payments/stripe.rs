use super::{CreateAuthorization, GatewayError, PaymentAuthorization, PaymentGateway};
use crate::config::AppConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            secret_key: cfg.payment_secret_key.clone(),
            api_base: cfg.payment_api_base.trim_end_matches('/').to_string(),
            timeout: cfg.payment_timeout(),
        }
    }
}

/// Payment-intents client for Stripe-compatible processors
#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::unavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base, path)
    }

    async fn parse_response(
        response: reqwest::Response,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<PaymentAuthorization>().await.map_err(|e| {
                GatewayError::invalid_response(format!("Failed to parse processor response: {}", e))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<StripeErrorEnvelope>(&body).ok();
        let code = parsed.as_ref().and_then(|p| p.error.code.clone());
        let message = parsed
            .and_then(|p| p.error.message)
            .unwrap_or_else(|| format!("Processor returned HTTP {}", status.as_u16()));

        warn!(status = status.as_u16(), code = ?code, "Payment processor error: {}", message);

        Err(match status {
            StatusCode::NOT_FOUND => {
                GatewayError::new(super::GatewayErrorKind::NotFound, message, code)
            }
            StatusCode::TOO_MANY_REQUESTS => GatewayError::unavailable(message),
            s if s.is_server_error() => GatewayError::unavailable(message),
            _ => GatewayError::rejected(message, code),
        })
    }
}

/// Processor object ids are alphanumeric with underscores.
fn is_valid_object_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount_minor = request.amount_minor, currency = %request.currency))]
    async fn create_authorization(
        &self,
        request: CreateAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_ascii_lowercase()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in request.metadata {
            params.push((format!("metadata[{}]", key), value));
        }

        let response = self
            .client
            .post(self.url("payment_intents"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::unavailable(format!("Payment processor unreachable: {}", e)))?;

        let authorization = Self::parse_response(response).await?;
        info!(authorization_id = %authorization.id, "Payment authorization created");
        Ok(authorization)
    }

    #[instrument(skip(self))]
    async fn retrieve_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<PaymentAuthorization, GatewayError> {
        if !is_valid_object_id(authorization_id) {
            return Err(GatewayError::not_found(authorization_id));
        }

        let response = self
            .client
            .get(self.url(&format!("payment_intents/{}", authorization_id)))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| GatewayError::unavailable(format!("Payment processor unreachable: {}", e)))?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_validation() {
        assert!(is_valid_object_id("pi_3Nabc123"));
        assert!(!is_valid_object_id(""));
        assert!(!is_valid_object_id("pi_1/../customers"));
        assert!(!is_valid_object_id("pi 1"));
    }
}

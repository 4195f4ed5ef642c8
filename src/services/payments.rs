use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{currency, CreateAuthorization, PaymentGateway},
};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Who is paying; copied into the authorization metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payer {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentInput {
    /// Amount in major units
    pub amount: Decimal,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentCreated {
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
    pub livemode: bool,
    /// Amount in minor units as accepted by the processor
    pub amount: i64,
}

/// Opens payment authorizations for the checkout page.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    default_currency: String,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            event_sender,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self, payer, input), fields(user_id = %payer.user_id, amount = %input.amount))]
    pub async fn create_intent(
        &self,
        payer: &Payer,
        input: CreatePaymentIntentInput,
    ) -> Result<PaymentIntentCreated, ServiceError> {
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let currency = input
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_currency)
            .to_ascii_lowercase();

        let amount_minor = currency::major_to_minor(input.amount, &currency)
            .filter(|minor| *minor > 0)
            .ok_or_else(|| {
                ServiceError::InvalidAmount(format!(
                    "{} cannot be charged in {}",
                    input.amount, currency
                ))
            })?;

        let request = CreateAuthorization {
            amount_minor,
            currency: currency.clone(),
            metadata: vec![
                ("userId".to_string(), payer.user_id.to_string()),
                ("userEmail".to_string(), payer.email.clone()),
                ("userName".to_string(), payer.name.clone()),
            ],
        };

        let authorization = self.gateway.create_authorization(request).await?;
        counter!("checkout_payment_intents_created_total", 1);
        info!(authorization_id = %authorization.id, amount_minor, "Payment intent opened");

        self.event_sender
            .send_or_log(Event::PaymentAuthorizationCreated {
                authorization_id: authorization.id.clone(),
                user_id: payer.user_id,
                amount_minor: authorization.amount,
                currency,
            })
            .await;

        Ok(PaymentIntentCreated {
            client_secret: authorization.client_secret,
            payment_intent_id: authorization.id,
            livemode: authorization.livemode,
            amount: authorization.amount,
        })
    }
}

use super::common::success_response;
use crate::auth::AuthUser;
use crate::errors::{ApiError, ServiceError};
use crate::handlers::AppState;
use crate::services::checkout::{ConfirmPaymentInput, FinalizeResponse};
use crate::services::payments::{CreatePaymentIntentInput, Payer};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    response::Response,
    routing::post,
    Router,
};
use tracing::info;

impl From<&AuthUser> for Payer {
    fn from(user: &AuthUser) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email.clone().unwrap_or_default(),
            name: user.name.clone().unwrap_or_default(),
        }
    }
}

/// Open a payment authorization for the checkout page
async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreatePaymentIntentInput>,
) -> Result<Response, ApiError> {
    let created = state
        .services
        .payments
        .create_intent(&Payer::from(&user), input)
        .await?;
    Ok(success_response(created))
}

async fn finalize(
    state: &AppState,
    user: &AuthUser,
    authorization_id: &str,
    input: ConfirmPaymentInput,
) -> Result<Response, ApiError> {
    let outcome = state
        .services
        .checkout
        .finalize(user.user_id, authorization_id, input)
        .await?;
    info!(
        order_id = %outcome.order_id(),
        duplicate = outcome.is_duplicate(),
        "Payment confirmation handled"
    );
    Ok(success_response(FinalizeResponse::from(outcome)))
}

/// A request without a JSON body confirms with empty input; a malformed body is
/// reported as such instead of surfacing later as a missing field.
fn confirm_input(
    body: Result<Json<ConfirmPaymentInput>, JsonRejection>,
) -> Result<ConfirmPaymentInput, ApiError> {
    match body {
        Ok(Json(input)) => Ok(input),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(ConfirmPaymentInput::default()),
        Err(rejection) => Err(ApiError::ValidationError(rejection.body_text())),
    }
}

/// Confirm a settled payment and create its order
async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(authorization_id): Path<String>,
    body: Result<Json<ConfirmPaymentInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = confirm_input(body)?;
    finalize(&state, &user, &authorization_id, input).await
}

/// Same as [`confirm_payment`] with the authorization id carried in the body
async fn confirm_payment_from_body(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<ConfirmPaymentInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let mut input = confirm_input(body)?;
    let authorization_id = input
        .payment_intent_id
        .take()
        .ok_or(ServiceError::MissingAuthorization)?;
    finalize(&state, &user, &authorization_id, input).await
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/intents", post(create_payment_intent))
        .route("/confirm", post(confirm_payment_from_body))
        .route("/:authorization_id/confirm", post(confirm_payment))
}

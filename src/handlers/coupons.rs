use super::common::{created_response, success_response, validate_input, MessageResponse};
use crate::auth::{AdminUser, AuthUser};
use crate::errors::ApiError;
use crate::handlers::AppState;
use crate::services::coupons::{CreateCouponInput, UpdateCouponInput};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, put},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponQuery {
    pub total_amount: Option<String>,
}

impl ValidateCouponQuery {
    /// Blank or non-numeric totals are treated as not supplied.
    fn order_total(&self) -> Option<Decimal> {
        self.total_amount
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| Decimal::from_str(raw).ok())
    }
}

/// Check a coupon against the redeemability rules. Public and read-only.
async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ValidateCouponQuery>,
) -> Result<Response, ApiError> {
    let coupon = state
        .services
        .coupons
        .validate(&code, query.order_total())
        .await?;
    Ok(success_response(coupon))
}

async fn create_coupon(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(input): Json<CreateCouponInput>,
) -> Result<Response, ApiError> {
    validate_input(&input)?;
    let coupon = state.services.coupons.create(input).await?;
    Ok(created_response(coupon))
}

async fn list_coupons(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Response, ApiError> {
    Ok(success_response(state.services.coupons.list().await?))
}

async fn update_coupon(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCouponInput>,
) -> Result<Response, ApiError> {
    validate_input(&input)?;
    let coupon = state.services.coupons.update(id, input).await?;
    Ok(success_response(coupon))
}

async fn delete_coupon(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.services.coupons.delete(id).await?;
    Ok(success_response(MessageResponse::new("Coupon deleted")))
}

/// Count one use of a coupon
async fn use_coupon(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let coupon = state.services.coupons.record_use(id).await?;
    Ok(success_response(coupon))
}

pub fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/validate/:code", get(validate_coupon))
        .route("/:id", put(update_coupon).delete(delete_coupon))
        .route("/:id/use", put(use_coupon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn query(raw: Option<&str>) -> ValidateCouponQuery {
        ValidateCouponQuery {
            total_amount: raw.map(str::to_string),
        }
    }

    #[test]
    fn total_amount_is_optional_and_forgiving() {
        assert_eq!(query(Some("80")).order_total(), Some(dec!(80)));
        assert_eq!(query(Some(" 19.99 ")).order_total(), Some(dec!(19.99)));
        assert_eq!(query(Some("")).order_total(), None);
        assert_eq!(query(Some("abc")).order_total(), None);
        assert_eq!(query(None).order_total(), None);
    }
}

use crate::{
    entities::commerce::coupon::{self, DiscountType, Entity as Coupon},
    errors::ServiceError,
};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Condition, Expr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Reason a coupon cannot be redeemed. Checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Invalid coupon code")]
    UnknownCode,
    #[error("Coupon is no longer active")]
    Inactive,
    #[error("Coupon is not valid at this time")]
    OutsideValidityWindow,
    #[error("Minimum purchase of ${} required", .minimum.normalize())]
    BelowMinimum { minimum: Decimal },
    #[error("Coupon has reached its usage limit")]
    UsageLimitReached,
}

impl CouponRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCode => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCode => "coupon_not_found",
            Self::Inactive => "coupon_inactive",
            Self::OutsideValidityWindow => "coupon_not_valid_now",
            Self::BelowMinimum { .. } => "coupon_minimum_not_met",
            Self::UsageLimitReached => "coupon_usage_exhausted",
        }
    }
}

/// Canonical form used for storage and lookup.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Applies the redeemability rules to a coupon at instant `now`.
///
/// `order_total` is optional; when absent the minimum-purchase rule is skipped.
/// The validity window is inclusive at both ends.
pub fn check_redeemable(
    coupon: &coupon::Model,
    now: DateTime<Utc>,
    order_total: Option<Decimal>,
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }

    if now < coupon.valid_from || now > coupon.valid_until {
        return Err(CouponRejection::OutsideValidityWindow);
    }

    if let Some(total) = order_total {
        if total < coupon.min_purchase {
            return Err(CouponRejection::BelowMinimum {
                minimum: coupon.min_purchase,
            });
        }
    }

    if let Some(limit) = coupon.usage_limit {
        if coupon.usage_count >= limit {
            return Err(CouponRejection::UsageLimitReached);
        }
    }

    Ok(())
}

/// Discount a redeemable coupon yields on `order_total`, in major units.
/// Never negative and never more than the total.
pub fn discount_for(coupon: &coupon::Model, order_total: Decimal) -> Decimal {
    if order_total <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let discount = order_total * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountType::Fixed => coupon.discount_value,
    };

    raw.max(Decimal::ZERO).min(order_total).round_dp(2)
}

/// A redeemable coupon, with the discount it yields when a total was supplied
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidation {
    #[serde(flatten)]
    pub coupon: coupon::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<Decimal>,
}

/// Outcome of tying a coupon to a finalized order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRedemption {
    Applied { code: String },
    Skipped { code: String, reason: String },
}

/// Input for creating a coupon
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_create_terms"))]
pub struct CreateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(custom = "validate_positive_amount")]
    pub discount_value: Decimal,
    #[validate(custom = "validate_non_negative_amount")]
    pub min_purchase: Option<Decimal>,
    #[validate(custom = "validate_positive_amount")]
    pub max_discount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
}

/// Partial update for a coupon; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponInput {
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(custom = "validate_positive_amount")]
    pub discount_value: Option<Decimal>,
    #[validate(custom = "validate_non_negative_amount")]
    pub min_purchase: Option<Decimal>,
    #[validate(custom = "validate_positive_amount")]
    pub max_discount: Option<Decimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    pub is_active: Option<bool>,
}

fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("positive_amount");
        err.message = Some("must be greater than 0".into());
        Err(err)
    }
}

fn validate_non_negative_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("non_negative_amount");
        err.message = Some("must not be negative".into());
        Err(err)
    }
}

fn check_terms(
    discount_type: DiscountType,
    discount_value: Decimal,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if discount_type == DiscountType::Percentage && discount_value > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("percentage_over_100");
        err.message = Some("percentage discounts cannot exceed 100".into());
        return Err(err);
    }
    if valid_until <= valid_from {
        let mut err = ValidationError::new("validity_window");
        err.message = Some("validUntil must be after validFrom".into());
        return Err(err);
    }
    Ok(())
}

fn validate_create_terms(input: &CreateCouponInput) -> Result<(), ValidationError> {
    check_terms(
        input.discount_type,
        input.discount_value,
        input.valid_from,
        input.valid_until,
    )
}

/// Coupon lookup, validation and administration
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_code<C: ConnectionTrait>(
        conn: &C,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(conn)
            .await?)
    }

    /// Authoritative redeemability check. Read-only: usage count is untouched.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        order_total: Option<Decimal>,
    ) -> Result<CouponValidation, ServiceError> {
        let coupon = Self::find_by_code(&*self.db, code)
            .await?
            .ok_or(CouponRejection::UnknownCode)?;

        check_redeemable(&coupon, Utc::now(), order_total)?;
        let discount = order_total.map(|total| discount_for(&coupon, total));
        Ok(CouponValidation { coupon, discount })
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let code = normalize_code(&input.code);

        if Self::find_by_code(&*self.db, &code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_purchase: Set(input.min_purchase.unwrap_or(Decimal::ZERO)),
            max_discount: Set(input.max_discount),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            is_active: Set(input.is_active.unwrap_or(true)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict(format!("Coupon code {} already exists", code))
            }
            _ => ServiceError::DatabaseError(e),
        })?;

        info!(coupon_id = %created.id, "Coupon created");
        Ok(created)
    }

    /// All coupons, newest first
    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", id)))
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        let discount_type = input.discount_type.unwrap_or(existing.discount_type);
        let discount_value = input.discount_value.unwrap_or(existing.discount_value);
        let valid_from = input.valid_from.unwrap_or(existing.valid_from);
        let valid_until = input.valid_until.unwrap_or(existing.valid_until);
        check_terms(discount_type, discount_value, valid_from, valid_until).map_err(|e| {
            ServiceError::ValidationError(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            )
        })?;

        let mut active = existing.into_active_model();
        if let Some(code) = input.code {
            active.code = Set(normalize_code(&code));
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(min_purchase) = input.min_purchase {
            active.min_purchase = Set(min_purchase);
        }
        if let Some(max_discount) = input.max_discount {
            active.max_discount = Set(Some(max_discount));
        }
        if let Some(usage_limit) = input.usage_limit {
            active.usage_limit = Set(Some(usage_limit));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.discount_type = Set(discount_type);
        active.discount_value = Set(discount_value);
        active.valid_from = Set(valid_from);
        active.valid_until = Set(valid_until);

        active.update(&*self.db).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict("Coupon code already exists".to_string())
            }
            _ => ServiceError::DatabaseError(e),
        })
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = Coupon::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        info!(coupon_id = %id, "Coupon deleted");
        Ok(())
    }

    /// Unconditionally counts one use of the coupon.
    #[instrument(skip(self))]
    pub async fn record_use(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {} not found", id)));
        }
        self.get(id).await
    }

    /// Ties a coupon to an order being written on `conn`.
    ///
    /// The increment is conditional on the coupon still being active and under
    /// its limit, so concurrent redemptions cannot overshoot `usage_limit`.
    pub async fn redeem_within<C: ConnectionTrait>(
        conn: &C,
        code: &str,
        order_total: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponRedemption, ServiceError> {
        let normalized = normalize_code(code);
        let coupon = match Self::find_by_code(conn, &normalized).await? {
            Some(coupon) => coupon,
            None => {
                return Ok(CouponRedemption::Skipped {
                    code: normalized,
                    reason: CouponRejection::UnknownCode.to_string(),
                })
            }
        };

        // The charged total already has the discount applied, so the minimum
        // purchase rule was enforced before payment and is not rechecked here.
        if let Err(rejection) = check_redeemable(&coupon, now, None) {
            return Ok(CouponRedemption::Skipped {
                code: normalized,
                reason: rejection.to_string(),
            });
        }

        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(code = %normalized, "Coupon exhausted by a concurrent redemption");
            return Ok(CouponRedemption::Skipped {
                code: normalized,
                reason: CouponRejection::UsageLimitReached.to_string(),
            });
        }

        info!(code = %normalized, order_total = %order_total, "Coupon redeemed");
        Ok(CouponRedemption::Applied { code: normalized })
    }
}

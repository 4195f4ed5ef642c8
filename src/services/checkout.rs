//! Payment-confirmed order finalization.
//!
//! The payment processor is the source of truth for what was charged. The
//! client-submitted cart only contributes the line-item snapshot and an
//! advisory amount check; totals, currency and payment method always come
//! from the authorization record.
//!
//! At most one order exists per authorization. The read-before-insert check
//! short-circuits the common retry case; the unique index on
//! `orders.payment_intent_id` is what actually holds the line when two
//! confirmations race, and its violation is reported as a duplicate.

use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{currency, PaymentAuthorization, PaymentGateway},
    services::{
        carts::CartService,
        coupons::{CouponRedemption, CouponService},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Absolute tolerance, in major units, for the advisory amount check.
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.01);

const DEFAULT_PAYMENT_METHOD: &str = "card";
const UNKNOWN_PRODUCT: &str = "Unknown Product";

/// Shipping address as submitted by the client. Every field is optional on
/// the wire so that completeness can be reported as a domain error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressInput {
    #[serde(alias = "address")]
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// A complete shipping address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Line item as submitted by the client; any field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    pub product_id: Option<String>,
    /// Product reference under the catalog's document-id name
    #[serde(rename = "_id")]
    pub legacy_id: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    pub size: Option<String>,
    pub color: Option<String>,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: Option<i64>,
}

/// Accepts a JSON number or a numeric string. Anything else counts as absent.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let parse = |raw: &str| {
        let raw = raw.trim();
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .ok()
    };
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => parse(&n.to_string()),
        Some(Value::String(s)) => parse(&s),
        _ => None,
    })
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_decimal(deserializer)?.and_then(|q| q.trunc().to_i64()))
}

/// Line item with defaults applied, ready to snapshot onto an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: Option<String>,
    pub name: String,
    pub image: String,
    pub price: Decimal,
    pub size: String,
    pub color: String,
    pub quantity: i32,
}

impl OrderLine {
    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Body of a confirm-payment request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentInput {
    /// Used when the authorization id is not part of the route
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddressInput>,
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// Result of the advisory reconciliation between paid amount and line items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountCheck {
    /// No line items were submitted
    Skipped,
    Matched,
    Mismatch { expected: Decimal, paid: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Created { order_id: Uuid },
    Duplicate { order_id: Uuid },
}

impl FinalizeOutcome {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created { order_id } | Self::Duplicate { order_id } => *order_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub order_id: Uuid,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    pub message: String,
}

impl From<FinalizeOutcome> for FinalizeResponse {
    fn from(outcome: FinalizeOutcome) -> Self {
        let message = match outcome {
            FinalizeOutcome::Created { .. } => "Payment confirmed and order created successfully",
            FinalizeOutcome::Duplicate { .. } => "Order already exists for this payment",
        };
        Self {
            success: true,
            order_id: outcome.order_id(),
            duplicate: outcome.is_duplicate(),
            message: message.to_string(),
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Requires street, city, postal code and country to be non-blank.
pub fn validate_shipping_address(
    input: Option<&ShippingAddressInput>,
) -> Result<ShippingAddress, ServiceError> {
    let empty = ShippingAddressInput::default();
    let input = input.unwrap_or(&empty);

    let street = present(&input.street);
    let city = present(&input.city);
    let postal_code = present(&input.postal_code);
    let country = present(&input.country);

    match (street, city, postal_code, country) {
        (Some(street), Some(city), Some(postal_code), Some(country)) => Ok(ShippingAddress {
            street,
            city,
            postal_code,
            country,
        }),
        (street, city, postal_code, country) => {
            let missing: Vec<&str> = [
                ("street", street.is_none()),
                ("city", city.is_none()),
                ("postalCode", postal_code.is_none()),
                ("country", country.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            Err(ServiceError::InvalidShippingAddress(missing.join(", ")))
        }
    }
}

/// Applies per-field defaults to client line items.
pub fn normalize_items(items: &[LineItemInput]) -> Vec<OrderLine> {
    items
        .iter()
        .map(|item| OrderLine {
            product_id: present(&item.product_id).or_else(|| present(&item.legacy_id)),
            name: present(&item.name).unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
            image: item.image.clone().unwrap_or_default(),
            price: item.price.unwrap_or(Decimal::ZERO),
            size: item.size.clone().unwrap_or_default(),
            color: item.color.clone().unwrap_or_default(),
            quantity: match item.quantity {
                Some(q) if q > 0 => i32::try_from(q).unwrap_or(i32::MAX),
                _ => 1,
            },
        })
        .collect()
}

/// Compares Σ price × quantity with the paid total.
pub fn reconcile_amount(items: &[OrderLine], paid: Decimal, tolerance: Decimal) -> AmountCheck {
    if items.is_empty() {
        return AmountCheck::Skipped;
    }
    let expected: Decimal = items.iter().map(OrderLine::subtotal).sum();
    if (expected - paid).abs() > tolerance {
        AmountCheck::Mismatch { expected, paid }
    } else {
        AmountCheck::Matched
    }
}

pub fn derive_payment_method(authorization: &PaymentAuthorization) -> String {
    authorization
        .payment_method_types
        .first()
        .filter(|m| !m.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string())
}

/// Everything needed to write one order
struct OrderDraft {
    user_id: Uuid,
    authorization_id: String,
    amount_minor: i64,
    currency: String,
    total_price: Decimal,
    payment_method: String,
    shipping: ShippingAddress,
    lines: Vec<OrderLine>,
    coupon_code: Option<String>,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Turns a settled payment authorization into exactly one order.
#[derive(Clone)]
pub struct OrderFinalizer {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
}

impl OrderFinalizer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    async fn existing_order_id(&self, authorization_id: &str) -> Result<Option<Uuid>, DbErr> {
        Ok(Order::find()
            .filter(order::Column::PaymentIntentId.eq(authorization_id))
            .one(&*self.db)
            .await?
            .map(|o| o.id))
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn finalize(
        &self,
        user_id: Uuid,
        authorization_id: &str,
        input: ConfirmPaymentInput,
    ) -> Result<FinalizeOutcome, ServiceError> {
        let authorization_id = authorization_id.trim();
        if authorization_id.is_empty() {
            return Err(ServiceError::MissingAuthorization);
        }

        let authorization = self
            .gateway
            .retrieve_authorization(authorization_id)
            .await
            .map_err(|e| {
                warn!(authorization_id, kind = ?e.kind, "Authorization lookup failed: {}", e);
                ServiceError::Gateway(e)
            })?;

        if !authorization.status.is_settled() {
            counter!("checkout_unsettled_confirmations_total", 1);
            return Err(ServiceError::PaymentNotSettled {
                status: authorization.status.to_string(),
            });
        }

        if let Some(order_id) = self.existing_order_id(authorization_id).await? {
            return Ok(self.duplicate(order_id, authorization_id).await);
        }

        let total_price = currency::minor_to_major(authorization.amount, &authorization.currency);
        if total_price <= Decimal::ZERO {
            return Err(ServiceError::InvalidTotal(format!(
                "payment {} settled for {} {}",
                authorization_id, authorization.amount, authorization.currency
            )));
        }
        let payment_method = derive_payment_method(&authorization);

        let lines = normalize_items(&input.items);
        if let AmountCheck::Mismatch { expected, paid } =
            reconcile_amount(&lines, total_price, AMOUNT_TOLERANCE)
        {
            warn!(
                authorization_id,
                expected = %expected,
                paid = %paid,
                "Paid amount does not match submitted line items"
            );
            counter!("checkout_amount_mismatch_total", 1);
            self.event_sender
                .send_or_log(Event::AmountMismatch {
                    authorization_id: authorization_id.to_string(),
                    paid_minor: authorization.amount,
                    expected_minor: currency::major_to_minor(expected, &authorization.currency)
                        .unwrap_or_default(),
                })
                .await;
        }

        let shipping = validate_shipping_address(input.shipping_address.as_ref())?;

        let draft = OrderDraft {
            user_id,
            authorization_id: authorization_id.to_string(),
            amount_minor: authorization.amount,
            currency: authorization.currency.to_ascii_lowercase(),
            total_price,
            payment_method,
            shipping,
            lines,
            coupon_code: present(&input.coupon_code),
        };

        let (order_id, redemption) = match self.persist(draft).await {
            Ok(written) => written,
            Err(ServiceError::DatabaseError(db_err)) if is_unique_violation(&db_err) => {
                info!(authorization_id, "Concurrent confirmation already created the order");
                return match self.existing_order_id(authorization_id).await {
                    Ok(Some(order_id)) => Ok(self.duplicate(order_id, authorization_id).await),
                    Ok(None) => Err(self.persistence_failure(authorization_id, db_err)),
                    Err(e) => Err(self.persistence_failure(authorization_id, e)),
                };
            }
            Err(ServiceError::DatabaseError(db_err)) => {
                return Err(self.persistence_failure(authorization_id, db_err));
            }
            Err(other) => return Err(other),
        };

        counter!("checkout_orders_created_total", 1);
        info!(%order_id, authorization_id, "Order created from settled payment");

        match redemption {
            Some(CouponRedemption::Applied { code }) => {
                self.event_sender
                    .send_or_log(Event::CouponRedeemed { code, order_id })
                    .await;
            }
            Some(CouponRedemption::Skipped { code, reason }) => {
                warn!(%order_id, code = %code, reason = %reason, "Coupon not applied to order");
            }
            None => {}
        }

        self.event_sender
            .send_or_log(Event::OrderFinalized {
                order_id,
                user_id,
                authorization_id: authorization_id.to_string(),
            })
            .await;

        self.clear_carts(user_id).await;

        Ok(FinalizeOutcome::Created { order_id })
    }

    async fn duplicate(&self, order_id: Uuid, authorization_id: &str) -> FinalizeOutcome {
        counter!("checkout_duplicate_finalizations_total", 1);
        self.event_sender
            .send_or_log(Event::DuplicateFinalization {
                order_id,
                authorization_id: authorization_id.to_string(),
            })
            .await;
        FinalizeOutcome::Duplicate { order_id }
    }

    fn persistence_failure(&self, authorization_id: &str, source: DbErr) -> ServiceError {
        counter!("checkout_persistence_failures_total", 1);
        error!(
            authorization_id,
            error = %source,
            "Payment settled but order could not be saved"
        );
        ServiceError::OrderPersistence {
            authorization_id: authorization_id.to_string(),
            source,
        }
    }

    /// Writes the order, its lines and any coupon redemption atomically.
    async fn persist(
        &self,
        draft: OrderDraft,
    ) -> Result<(Uuid, Option<CouponRedemption>), ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let redemption = match &draft.coupon_code {
            Some(code) => {
                Some(CouponService::redeem_within(&txn, code, draft.total_price, now).await?)
            }
            None => None,
        };
        let applied_code = match &redemption {
            Some(CouponRedemption::Applied { code }) => Some(code.clone()),
            _ => None,
        };

        let order_id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(order_id),
            user_id: Set(draft.user_id),
            total_price: Set(draft.total_price),
            amount_minor: Set(draft.amount_minor),
            currency: Set(draft.currency),
            payment_method: Set(draft.payment_method),
            shipping_address: Set(draft.shipping.street),
            shipping_city: Set(draft.shipping.city),
            shipping_postal_code: Set(draft.shipping.postal_code),
            shipping_country: Set(draft.shipping.country),
            payment_status: Set(PaymentStatus::Completed),
            status: Set(OrderStatus::Processing),
            is_paid: Set(true),
            paid_at: Set(Some(now)),
            payment_intent_id: Set(draft.authorization_id),
            coupon_code: Set(applied_code),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (position, line) in draft.lines.into_iter().enumerate() {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                position: Set(i32::try_from(position).unwrap_or(i32::MAX)),
                product_id: Set(line.product_id),
                name: Set(line.name),
                image: Set(line.image),
                price: Set(line.price),
                size: Set(line.size),
                color: Set(line.color),
                quantity: Set(line.quantity),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok((order_id, redemption))
    }

    /// Cart removal runs after commit; a stale cart is tolerable, a lost order is not.
    async fn clear_carts(&self, user_id: Uuid) {
        match CartService::clear_for_user(&*self.db, user_id).await {
            Ok(0) => {}
            Ok(carts) => {
                self.event_sender
                    .send_or_log(Event::CartCleared { user_id, carts })
                    .await;
            }
            Err(e) => {
                counter!("checkout_cart_clear_failures_total", 1);
                warn!(%user_id, error = %e, "Failed to clear cart after order creation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{AuthorizationStatus, GatewayError, MockPaymentGateway};
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn authorization(status: AuthorizationStatus, amount: i64) -> PaymentAuthorization {
        PaymentAuthorization {
            id: "pi_test".into(),
            amount,
            currency: "usd".into(),
            status,
            payment_method_types: vec![],
            metadata: HashMap::new(),
            client_secret: None,
            livemode: false,
        }
    }

    fn finalizer(gateway: MockPaymentGateway) -> OrderFinalizer {
        let (tx, _rx) = mpsc::channel(8);
        OrderFinalizer::new(
            Arc::new(DatabaseConnection::Disconnected),
            Arc::new(gateway),
            Arc::new(EventSender::new(tx)),
        )
    }

    fn address() -> ShippingAddressInput {
        ShippingAddressInput {
            street: Some("1 Main St".into()),
            city: Some("Springfield".into()),
            postal_code: Some("12345".into()),
            country: Some("US".into()),
        }
    }

    #[test]
    fn shipping_address_requires_all_fields() {
        assert!(validate_shipping_address(Some(&address())).is_ok());

        let mut missing_city = address();
        missing_city.city = Some("   ".into());
        assert_matches!(
            validate_shipping_address(Some(&missing_city)),
            Err(ServiceError::InvalidShippingAddress(fields)) if fields == "city"
        );

        assert_matches!(
            validate_shipping_address(None),
            Err(ServiceError::InvalidShippingAddress(fields))
                if fields == "street, city, postalCode, country"
        );
    }

    #[test]
    fn shipping_address_accepts_address_alias() {
        let input: ShippingAddressInput = serde_json::from_value(serde_json::json!({
            "address": "1 Main St",
            "city": "Springfield",
            "postalCode": "12345",
            "country": "US"
        }))
        .unwrap();
        let address = validate_shipping_address(Some(&input)).unwrap();
        assert_eq!(address.street, "1 Main St");
        assert_eq!(address.postal_code, "12345");
    }

    #[test]
    fn loosely_typed_item_fields_are_read_or_defaulted() {
        let items: Vec<LineItemInput> = serde_json::from_value(serde_json::json!([
            { "price": "10.50", "quantity": "2" },
            { "price": "n/a", "quantity": true },
            { "price": 12.5, "quantity": 3.0 }
        ]))
        .unwrap();

        let lines = normalize_items(&items);
        assert_eq!(lines[0].price, dec!(10.50));
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[1].price, Decimal::ZERO);
        assert_eq!(lines[1].quantity, 1);
        assert_eq!(lines[2].price, dec!(12.5));
        assert_eq!(lines[2].quantity, 3);
    }

    #[test]
    fn line_items_get_defaults() {
        let items: Vec<LineItemInput> = serde_json::from_value(serde_json::json!([
            {},
            { "_id": "sku-1", "name": "Tee", "price": 20, "quantity": 0 },
            { "productId": "sku-2", "_id": "ignored", "quantity": 3, "size": "M" }
        ]))
        .unwrap();

        let lines = normalize_items(&items);
        assert_eq!(lines[0].name, UNKNOWN_PRODUCT);
        assert_eq!(lines[0].price, Decimal::ZERO);
        assert_eq!(lines[0].quantity, 1);
        assert_eq!(lines[0].product_id, None);

        assert_eq!(lines[1].product_id.as_deref(), Some("sku-1"));
        assert_eq!(lines[1].quantity, 1);

        assert_eq!(lines[2].product_id.as_deref(), Some("sku-2"));
        assert_eq!(lines[2].quantity, 3);
        assert_eq!(lines[2].size, "M");
        assert_eq!(lines[2].color, "");
    }

    #[test]
    fn reconciliation_uses_absolute_tolerance() {
        let lines = vec![OrderLine {
            product_id: None,
            name: "Tee".into(),
            image: String::new(),
            price: dec!(24.995),
            size: String::new(),
            color: String::new(),
            quantity: 2,
        }];

        assert_eq!(
            reconcile_amount(&lines, dec!(49.99), AMOUNT_TOLERANCE),
            AmountCheck::Matched
        );
        assert_eq!(
            reconcile_amount(&lines, dec!(49.00), AMOUNT_TOLERANCE),
            AmountCheck::Mismatch {
                expected: dec!(49.990),
                paid: dec!(49.00)
            }
        );
        assert_eq!(
            reconcile_amount(&[], dec!(49.99), AMOUNT_TOLERANCE),
            AmountCheck::Skipped
        );
    }

    #[test]
    fn payment_method_defaults_to_card() {
        let mut auth = authorization(AuthorizationStatus::Succeeded, 100);
        assert_eq!(derive_payment_method(&auth), "card");
        auth.payment_method_types = vec!["klarna".into(), "card".into()];
        assert_eq!(derive_payment_method(&auth), "klarna");
    }

    #[test]
    fn duplicate_flag_is_omitted_for_new_orders() {
        let created = FinalizeResponse::from(FinalizeOutcome::Created {
            order_id: Uuid::new_v4(),
        });
        let body = serde_json::to_value(&created).unwrap();
        assert!(body.get("duplicate").is_none());
        assert_eq!(body["success"], true);

        let dup = FinalizeResponse::from(FinalizeOutcome::Duplicate {
            order_id: Uuid::new_v4(),
        });
        assert_eq!(serde_json::to_value(&dup).unwrap()["duplicate"], true);
    }

    #[tokio::test]
    async fn blank_authorization_id_never_reaches_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_retrieve_authorization().times(0);

        let result = finalizer(gateway)
            .finalize(Uuid::new_v4(), "  ", ConfirmPaymentInput::default())
            .await;
        assert_matches!(result, Err(ServiceError::MissingAuthorization));
    }

    #[tokio::test]
    async fn unsettled_payment_is_rejected() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_retrieve_authorization()
            .times(1)
            .returning(|_| Ok(authorization(AuthorizationStatus::RequiresPaymentMethod, 4999)));

        let result = finalizer(gateway)
            .finalize(Uuid::new_v4(), "pi_test", ConfirmPaymentInput::default())
            .await;
        assert_matches!(
            result,
            Err(ServiceError::PaymentNotSettled { status }) if status == "requires_payment_method"
        );
    }

    #[tokio::test]
    async fn gateway_errors_are_propagated() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_retrieve_authorization()
            .returning(|id| Err(GatewayError::not_found(id)));

        let err = finalizer(gateway)
            .finalize(Uuid::new_v4(), "pi_missing", ConfirmPaymentInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "authorization_not_found");
    }
}

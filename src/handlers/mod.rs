pub mod carts;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;

use crate::{
    db::DbPool,
    events::EventSender,
    payments::PaymentGateway,
    services::{
        carts::CartService, checkout::OrderFinalizer, coupons::CouponService,
        orders::OrderService, payments::PaymentService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<OrderFinalizer>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        default_currency: &str,
    ) -> Self {
        Self {
            checkout: Arc::new(OrderFinalizer::new(
                db_pool.clone(),
                gateway.clone(),
                event_sender.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                gateway,
                event_sender.clone(),
                default_currency,
            )),
            coupons: Arc::new(CouponService::new(db_pool.clone())),
            carts: Arc::new(CartService::new(db_pool.clone(), event_sender)),
            orders: Arc::new(OrderService::new(db_pool)),
        }
    }
}

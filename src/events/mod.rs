use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping storefront event: {}", e);
        }
    }
}

// Domain events emitted by the storefront services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PaymentAuthorizationCreated {
        authorization_id: String,
        user_id: Uuid,
        amount_minor: i64,
        currency: String,
    },
    OrderFinalized {
        order_id: Uuid,
        user_id: Uuid,
        authorization_id: String,
    },
    /// A confirm call arrived for an authorization that already has an order
    DuplicateFinalization {
        order_id: Uuid,
        authorization_id: String,
    },
    /// The paid amount and the submitted line items disagree
    AmountMismatch {
        authorization_id: String,
        paid_minor: i64,
        expected_minor: i64,
    },
    CouponRedeemed {
        code: String,
        order_id: Uuid,
    },
    CartCleared {
        user_id: Uuid,
        carts: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PaymentAuthorizationCreated { .. } => "payment_authorization_created",
            Event::OrderFinalized { .. } => "order_finalized",
            Event::DuplicateFinalization { .. } => "duplicate_finalization",
            Event::AmountMismatch { .. } => "amount_mismatch",
            Event::CouponRedeemed { .. } => "coupon_redeemed",
            Event::CartCleared { .. } => "cart_cleared",
        }
    }
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront_events_total", 1, "event" => event.name());

        match &event {
            Event::OrderFinalized {
                order_id,
                user_id,
                authorization_id,
            } => {
                info!(%order_id, %user_id, authorization_id = %authorization_id, "Order finalized");
            }
            Event::DuplicateFinalization {
                order_id,
                authorization_id,
            } => {
                info!(%order_id, authorization_id = %authorization_id, "Repeated confirmation for existing order");
            }
            Event::AmountMismatch {
                authorization_id,
                paid_minor,
                expected_minor,
            } => {
                warn!(
                    authorization_id = %authorization_id,
                    paid_minor,
                    expected_minor,
                    "Paid amount differs from line items"
                );
            }
            Event::CouponRedeemed { code, order_id } => {
                info!(code = %code, %order_id, "Coupon redeemed");
            }
            Event::CartCleared { user_id, carts } => {
                info!(%user_id, carts, "Cart cleared");
            }
            Event::PaymentAuthorizationCreated {
                authorization_id,
                user_id,
                amount_minor,
                currency,
            } => {
                info!(
                    authorization_id = %authorization_id,
                    %user_id,
                    amount_minor,
                    currency = %currency,
                    "Payment authorization created"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}

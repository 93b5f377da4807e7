use rust_decimal::Decimal;
use uuid::Uuid;

pub const ORDER_PAID_TOPIC: &str = "order.paid";
pub const PAYMENT_FAILED_TOPIC: &str = "payment.failed";
pub const RECONCILIATION_FAILED_TOPIC: &str = "payment.reconciliation_failed";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct OrderPaidEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_id: String,
    pub payment_method: Option<String>,
    pub payment_id: String,
    pub total_amount: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentFailedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_id: String,
    pub reason: String,
    pub timestamp: i64,
}

/// Raised when a webhook/callback could not be reconciled. The provider still gets
/// a 200, so this event is the only signal that an order may be stuck.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReconciliationFailedEvent {
    pub provider: String,
    pub payment_id: Option<String>,
    pub error: String,
    pub timestamp: i64,
}

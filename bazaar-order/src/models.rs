use bazaar_catalog::{AlertType, FeeAdjustments, LineAmount};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Fulfillment lifecycle. Only `Confirmed` is driven by payment; the rest belongs
/// to vendor/admin tooling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Confirmed | Processing, Cancelled)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Payment lifecycle. `Paid` is absorbing; `Failed` may go back to `Pending` on retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Paid => "paid",
            OrderPaymentStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: OrderPaymentStatus) -> bool {
        use OrderPaymentStatus::*;
        // Failed -> Paid: a late success for an earlier attempt still settles the order
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Failed) | (Failed, Pending) | (Failed, Paid)
        )
    }
}

/// A payment status change the lifecycle does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payment status cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: OrderPaymentStatus,
    pub to: OrderPaymentStatus,
}

impl FromStr for OrderPaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderPaymentStatus::Pending),
            "paid" => Ok(OrderPaymentStatus::Paid),
            "failed" => Ok(OrderPaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Aggregate root of a purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub payment_method: Option<String>,
    pub payment_intent_id: Option<String>,
    /// Failed payment attempts so far; part of the card idempotency key
    pub payment_attempts: i32,
    /// Set while a provider push is in flight for this order
    #[serde(skip_serializing, default)]
    pub payment_claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == OrderPaymentStatus::Paid
    }

    /// Lines as the amount calculator sees them
    pub fn line_amounts(&self) -> Vec<LineAmount> {
        self.items
            .iter()
            .map(|item| LineAmount::new(item.unit_price, item.quantity))
            .collect()
    }

    pub fn fees(&self) -> FeeAdjustments {
        FeeAdjustments {
            tax: self.tax_amount,
            shipping: self.shipping_amount,
            discount: self.discount_amount,
        }
    }

    /// Items grouped per vendor, ordered by vendor id
    pub fn items_by_vendor(&self) -> BTreeMap<Uuid, Vec<&OrderItem>> {
        let mut vendors: BTreeMap<Uuid, Vec<&OrderItem>> = BTreeMap::new();
        for item in &self.items {
            vendors.entry(item.vendor_id).or_default().push(item);
        }
        vendors
    }

    fn move_payment_to(&mut self, next: OrderPaymentStatus) -> Result<(), InvalidTransition> {
        if self.payment_status != next && !self.payment_status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.payment_status,
                to: next,
            });
        }
        self.payment_status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach a new provider reference for a fresh attempt and drop any claim
    pub fn begin_payment(&mut self, method: &str, payment_id: &str) -> Result<(), InvalidTransition> {
        self.move_payment_to(OrderPaymentStatus::Pending)?;
        self.payment_method = Some(method.to_string());
        self.payment_intent_id = Some(payment_id.to_string());
        self.payment_claimed_at = None;
        Ok(())
    }

    pub fn mark_paid(&mut self, payment_id: &str) -> Result<(), InvalidTransition> {
        self.move_payment_to(OrderPaymentStatus::Paid)?;
        if self.status.can_transition_to(OrderStatus::Confirmed) {
            self.status = OrderStatus::Confirmed;
        }
        self.payment_intent_id = Some(payment_id.to_string());
        self.payment_claimed_at = None;
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), InvalidTransition> {
        if self.payment_status != OrderPaymentStatus::Pending {
            return Err(InvalidTransition {
                from: self.payment_status,
                to: OrderPaymentStatus::Failed,
            });
        }
        self.move_payment_to(OrderPaymentStatus::Failed)?;
        self.payment_attempts += 1;
        Ok(())
    }

    /// Reserve the order for one provider push. Refused while another claim
    /// younger than `ttl` exists.
    pub fn claim_payment(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        if let Some(claimed_at) = self.payment_claimed_at {
            if now - claimed_at < ttl {
                return false;
            }
        }
        self.payment_claimed_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn release_payment_claim(&mut self) {
        self.payment_claimed_at = None;
        self.updated_at = Utc::now();
    }

    /// Reference of a still-pending attempt started with `method`
    pub fn pending_reference(&self, method: &str) -> Option<&str> {
        if self.payment_status != OrderPaymentStatus::Pending || self.payment_method.as_deref() != Some(method) {
            return None;
        }
        self.payment_intent_id.as_deref()
    }

    /// Idempotency key for card intents: stable while an attempt is in flight,
    /// different after each failure or provider switch
    pub fn idempotency_key(&self, method: &str) -> String {
        format!("{}-{}-{}", self.id, method, self.payment_attempts)
    }
}

/// A frozen line; the price is a snapshot taken at order time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn from_cart(order_id: Uuid, cart: &CartItem) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: cart.product_id,
            vendor_id: cart.vendor_id,
            product_name: cart.product_name.clone(),
            product_image: cart.product_image.clone(),
            quantity: cart.quantity,
            unit_price: cart.unit_price,
            created_at: Utc::now(),
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// One row of a customer's cart with its price snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Customer,
    Vendor,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Customer => "customer",
            RecipientType::Vendor => "vendor",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        }
    }
}

/// Notification record; delivery is handled elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_id: impl Into<String>,
        recipient_type: RecipientType,
        kind: &str,
        title: impl Into<String>,
        message: impl Into<String>,
        order_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id: recipient_id.into(),
            recipient_type,
            kind: kind.to_string(),
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            order_id,
            created_at: Utc::now(),
        }
    }

    pub fn high_priority(mut self) -> Self {
        self.priority = NotificationPriority::High;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAlert {
    pub id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub alert_type: AlertType,
    pub current_stock: i32,
    pub threshold: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Human-facing order number: time-ordered prefix plus a random suffix
pub fn generate_order_number() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_state_machine() {
        use OrderPaymentStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Paid.can_transition_to(Pending));
    }

    fn sample_order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: generate_order_number(),
            customer_id: "cust-1".to_string(),
            items: Vec::new(),
            shipping_address: serde_json::Value::Null,
            billing_address: serde_json::Value::Null,
            subtotal: Decimal::TEN,
            tax_amount: Decimal::ZERO,
            shipping_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::TEN,
            currency: "KES".to_string(),
            status: OrderStatus::Pending,
            payment_status: OrderPaymentStatus::Pending,
            payment_method: None,
            payment_intent_id: None,
            payment_attempts: 0,
            payment_claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_mutators_respect_payment_lifecycle() {
        let mut order = sample_order();
        order.begin_payment("mpesa", "ws_CO_1").unwrap();
        order.mark_failed().unwrap();
        assert_eq!(order.payment_attempts, 1);
        assert!(order.mark_failed().is_err());
        assert_eq!(order.payment_attempts, 1);

        order.begin_payment("mpesa", "ws_CO_2").unwrap();
        order.mark_paid("ws_CO_2").unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);

        let err = order.begin_payment("stripe", "pi_1").unwrap_err();
        assert_eq!(err, InvalidTransition { from: OrderPaymentStatus::Paid, to: OrderPaymentStatus::Pending });
        assert_eq!(order.payment_intent_id.as_deref(), Some("ws_CO_2"));
        assert!(order.mark_failed().is_err());
    }

    #[test]
    fn test_payment_claim_expires() {
        let mut order = sample_order();
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(30);

        assert!(order.claim_payment(now, ttl));
        assert!(!order.claim_payment(now + chrono::Duration::seconds(5), ttl));
        assert!(order.claim_payment(now + chrono::Duration::seconds(31), ttl));

        order.begin_payment("mpesa", "ws_CO_1").unwrap();
        assert!(order.payment_claimed_at.is_none());
        assert_eq!(order.pending_reference("mpesa"), Some("ws_CO_1"));
        assert_eq!(order.pending_reference("stripe"), None);
    }

    #[test]
    fn test_fulfillment_state_machine() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Shipped));
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderPaymentStatus>().is_err());
    }

    #[test]
    fn test_order_numbers_are_distinct() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("ORD-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }
}

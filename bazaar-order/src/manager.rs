use bazaar_catalog::{AmountBreakdown, PricingError, PricingPolicy};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{
    generate_order_number, CartItem, InvalidTransition, InventoryAlert, Notification, Order,
    OrderItem, OrderPaymentStatus, OrderStatus, RecipientType,
};
use crate::repository::{OrderStore, StoreError};
use crate::telemetry::PaymentTelemetry;

/// Everything needed to place an order besides the cart itself
#[derive(Debug, Clone)]
pub struct CheckoutDetails {
    pub shipping_address: serde_json::Value,
    pub billing_address: serde_json::Value,
    pub payment_method: Option<String>,
}

/// Result of a finalize call
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// State changed and side effects were written
    Applied(Order),
    /// Order was already in a state that makes this call a no-op
    Unchanged(Order),
}

impl FinalizeOutcome {
    pub fn order(&self) -> &Order {
        match self {
            FinalizeOutcome::Applied(order) | FinalizeOutcome::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            FinalizeOutcome::Applied(order) | FinalizeOutcome::Unchanged(order) => order,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, FinalizeOutcome::Applied(_))
    }
}

/// Owns order creation and every payment-driven transition of the aggregate
pub struct OrderManager {
    store: Arc<dyn OrderStore>,
    policy: PricingPolicy,
    telemetry: PaymentTelemetry,
}

impl OrderManager {
    pub fn new(store: Arc<dyn OrderStore>, policy: PricingPolicy, telemetry: PaymentTelemetry) -> Self {
        Self {
            store,
            policy,
            telemetry,
        }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    pub async fn find_by_payment_intent(&self, payment_id: &str) -> Result<Option<Order>, OrderError> {
        Ok(self.store.find_by_payment_intent(payment_id).await?)
    }

    /// Create an order from the customer's cart, consuming it in the same transaction
    pub async fn checkout_cart(&self, customer_id: &str, details: CheckoutDetails) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let cart = tx.take_cart_items(customer_id).await?;
        let order = self.build_order(customer_id, &cart, details)?;

        tx.insert_order(&order).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order created from {} cart lines",
            order.items.len()
        );
        Ok(order)
    }

    /// Persist the order and consume the snapshotted cart rows in one transaction.
    ///
    /// Fails with `CartChanged` and writes nothing when any snapshotted row is
    /// already gone, so one cart can never back two orders.
    pub async fn create_order(
        &self,
        customer_id: &str,
        cart: Vec<CartItem>,
        details: CheckoutDetails,
    ) -> Result<Order, OrderError> {
        let order = self.build_order(customer_id, &cart, details)?;

        let mut product_ids: Vec<Uuid> = cart.iter().map(|c| c.product_id).collect();
        product_ids.sort();
        product_ids.dedup();

        let mut tx = self.store.begin().await?;
        tx.insert_order(&order).await?;
        let removed = tx.remove_cart_items(customer_id, &product_ids).await?;
        if removed < product_ids.len() as u64 {
            warn!(
                customer_id,
                expected = product_ids.len(),
                removed,
                "Cart changed while the order was being created"
            );
            return Err(OrderError::CartChanged);
        }
        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order created from {} cart lines",
            order.items.len()
        );
        Ok(order)
    }

    fn build_order(&self, customer_id: &str, cart: &[CartItem], details: CheckoutDetails) -> Result<Order, OrderError> {
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let items: Vec<OrderItem> = cart.iter().map(|c| OrderItem::from_cart(order_id, c)).collect();

        let calculator = self.policy.calculator();
        let lines: Vec<_> = cart
            .iter()
            .map(|c| bazaar_catalog::LineAmount::new(c.unit_price, c.quantity))
            .collect();
        let subtotal = calculator.subtotal(&lines)?;
        let breakdown = calculator.calculate(&lines, self.policy.fees_for(subtotal))?;

        Ok(Order {
            id: order_id,
            order_number: generate_order_number(),
            customer_id: customer_id.to_string(),
            items,
            shipping_address: details.shipping_address,
            billing_address: details.billing_address,
            subtotal: breakdown.subtotal,
            tax_amount: breakdown.tax,
            shipping_amount: breakdown.shipping,
            discount_amount: breakdown.discount,
            total_amount: breakdown.total,
            currency: breakdown.currency,
            status: OrderStatus::Pending,
            payment_status: OrderPaymentStatus::Pending,
            payment_method: details.payment_method,
            payment_intent_id: None,
            payment_attempts: 0,
            payment_claimed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Recompute the total from the frozen items and compare with the stored one
    pub fn verify_integrity(&self, order: &Order) -> Result<AmountBreakdown, OrderError> {
        let breakdown = self
            .policy
            .calculator()
            .calculate(&order.line_amounts(), order.fees())?;

        if !breakdown.matches(order.total_amount) {
            error!(
                order_id = %order.id,
                stored_total = %order.total_amount,
                recomputed_total = %breakdown.total,
                recomputed_subtotal = %breakdown.subtotal,
                tax = %order.tax_amount,
                shipping = %order.shipping_amount,
                discount = %order.discount_amount,
                "Order total does not match its items"
            );
            return Err(OrderError::IntegrityMismatch {
                stored: order.total_amount,
                recomputed: breakdown.total,
            });
        }
        Ok(breakdown)
    }

    /// Reserve the right to start a provider push for this order.
    ///
    /// Runs under the row lock. A caller that gets `InFlight` must not call the
    /// provider; the pending reference is returned when one is already known.
    pub async fn claim_payment_attempt(
        &self,
        order_id: Uuid,
        method: &str,
        ttl: chrono::Duration,
    ) -> Result<PaymentClaim, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.is_paid() {
            return Err(OrderError::AlreadyPaid(order.order_number));
        }
        if let Some(reference) = order.pending_reference(method) {
            return Ok(PaymentClaim::InFlight(Some(reference.to_string())));
        }
        if !order.claim_payment(Utc::now(), ttl) {
            return Ok(PaymentClaim::InFlight(None));
        }

        tx.save_payment_state(&order).await?;
        tx.commit().await?;
        Ok(PaymentClaim::Claimed(order))
    }

    /// Drop a claim taken by `claim_payment_attempt` without attaching a reference
    pub async fn release_payment_claim(&self, order_id: Uuid) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.payment_claimed_at.is_none() {
            return Ok(());
        }
        order.release_payment_claim();
        tx.save_payment_state(&order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a new provider reference for an unpaid order.
    ///
    /// With `exclusive` set, a different pending reference for the same method
    /// is never overwritten.
    pub async fn attach_payment_intent(
        &self,
        order_id: Uuid,
        method: &str,
        payment_id: &str,
        exclusive: bool,
    ) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.is_paid() {
            return Err(OrderError::AlreadyPaid(order.order_number));
        }
        if exclusive {
            if let Some(existing) = order.pending_reference(method).filter(|r| *r != payment_id) {
                return Err(OrderError::PaymentInProgress(existing.to_string()));
            }
        }

        order.begin_payment(method, payment_id)?;
        tx.save_payment_state(&order).await?;
        tx.commit().await?;

        info!(order_id = %order.id, provider = method, payment_id, "Payment reference attached");
        Ok(order)
    }

    /// Mark the order paid and apply inventory and notification side effects.
    ///
    /// The paid check runs under the row lock, so concurrent or repeated calls
    /// apply the side effects exactly once.
    pub async fn finalize_success(&self, order_id: Uuid, payment_id: &str) -> Result<FinalizeOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.is_paid() {
            info!(order_id = %order.id, payment_id, "Order already paid, ignoring duplicate success");
            return Ok(FinalizeOutcome::Unchanged(order));
        }
        if order.status == OrderStatus::Cancelled {
            warn!(order_id = %order.id, payment_id, "Payment succeeded for a cancelled order");
        }

        order.mark_paid(payment_id)?;
        tx.save_payment_state(&order).await?;

        for item in &order.items {
            let Some(stock) = tx.record_sale(item.product_id, item.quantity).await? else {
                warn!(order_id = %order.id, product_id = %item.product_id, "Product no longer exists, skipping stock update");
                continue;
            };
            if let Some(alert_type) = stock.alert() {
                let alert = InventoryAlert {
                    id: Uuid::new_v4(),
                    product_id: stock.product_id,
                    vendor_id: stock.vendor_id,
                    alert_type,
                    current_stock: stock.inventory,
                    threshold: stock.low_stock_threshold,
                    message: stock.alert_message(alert_type),
                    created_at: Utc::now(),
                };
                tx.insert_inventory_alert(&alert).await?;
            }
        }

        for (vendor_id, items) in order.items_by_vendor() {
            let units: i32 = items.iter().map(|i| i.quantity).sum();
            let amount: Decimal = items.iter().map(|i| i.line_total()).sum();
            let notification = Notification::new(
                vendor_id.to_string(),
                RecipientType::Vendor,
                "new_order",
                format!("New order {}", order.order_number),
                format!("{} unit(s) sold for {} {}", units, amount, order.currency),
                Some(order.id),
            );
            tx.insert_notification(&notification).await?;
        }

        let notification = Notification::new(
            order.customer_id.clone(),
            RecipientType::Customer,
            "payment_received",
            "Payment received",
            format!(
                "Your payment of {} {} for order {} was successful",
                order.total_amount, order.currency, order.order_number
            ),
            Some(order.id),
        );
        tx.insert_notification(&notification).await?;

        tx.commit().await?;

        info!(order_id = %order.id, payment_id, "Order marked as paid");
        self.telemetry.log_order_paid(&order, payment_id).await;
        Ok(FinalizeOutcome::Applied(order))
    }

    /// Mark the payment failed. Never touches a paid order; repeating it is a no-op.
    pub async fn finalize_failure(&self, order_id: Uuid, reason: &str) -> Result<FinalizeOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        match order.payment_status {
            OrderPaymentStatus::Paid => {
                warn!(order_id = %order.id, "Ignoring failure report for a paid order: {}", reason);
                return Ok(FinalizeOutcome::Unchanged(order));
            }
            OrderPaymentStatus::Failed => return Ok(FinalizeOutcome::Unchanged(order)),
            OrderPaymentStatus::Pending => {}
        }

        order.mark_failed()?;
        tx.save_payment_state(&order).await?;

        let notification = Notification::new(
            order.customer_id.clone(),
            RecipientType::Customer,
            "payment_failed",
            "Payment failed",
            format!("Payment for order {} failed: {}", order.order_number, reason),
            Some(order.id),
        )
        .high_priority();
        tx.insert_notification(&notification).await?;

        tx.commit().await?;

        warn!(order_id = %order.id, "Order payment failed: {}", reason);
        self.telemetry.log_payment_failed(&order, reason).await;
        Ok(FinalizeOutcome::Applied(order))
    }
}

/// Result of `claim_payment_attempt`
#[derive(Debug, Clone)]
pub enum PaymentClaim {
    /// This caller may push; the order is returned with the claim set
    Claimed(Order),
    /// Another push is already running, with its reference if it has one
    InFlight(Option<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart changed while the order was being created")]
    CartChanged,

    #[error("Payment {0} is already in progress for this order")]
    PaymentInProgress(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order {0} has already been paid")]
    AlreadyPaid(String),

    #[error("Order total {stored} does not match recomputed total {recomputed}")]
    IntegrityMismatch { stored: Decimal, recomputed: Decimal },

    #[error("Order does not belong to this customer")]
    Forbidden,

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

//! In-process store used by tests and local runs without Postgres.
//!
//! Transactions are serialized through one async lock and work on a staged copy
//! of the state; only `commit` publishes it.

use async_trait::async_trait;
use bazaar_catalog::StockLevel;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::models::{CartItem, InventoryAlert, Notification, Order};
use crate::repository::{OrderStore, OrderTransaction, StoreError};
use crate::telemetry::EventPublisher;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: HashMap<Uuid, Order>,
    carts: HashMap<String, Vec<CartItem>>,
    products: HashMap<Uuid, StockLevel>,
    alerts: Vec<InventoryAlert>,
    notifications: Vec<Notification>,
}

/// Transaction step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    RecordSale,
    InsertAlert,
    InsertNotification,
}

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<Mutex<MemoryState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product and return its id
    pub fn add_product(&self, name: &str, vendor_id: Uuid, inventory: i32, low_stock_threshold: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        guard(&self.state).products.insert(
            product_id,
            StockLevel {
                product_id,
                product_name: name.to_string(),
                vendor_id,
                inventory,
                sold_count: 0,
                low_stock_threshold,
            },
        );
        product_id
    }

    pub fn set_cart(&self, customer_id: &str, items: Vec<CartItem>) {
        guard(&self.state).carts.insert(customer_id.to_string(), items);
    }

    pub fn cart(&self, customer_id: &str) -> Vec<CartItem> {
        guard(&self.state).carts.get(customer_id).cloned().unwrap_or_default()
    }

    pub fn stock(&self, product_id: Uuid) -> Option<StockLevel> {
        guard(&self.state).products.get(&product_id).cloned()
    }

    pub fn alerts(&self) -> Vec<InventoryAlert> {
        guard(&self.state).alerts.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        guard(&self.state).notifications.clone()
    }

    pub fn order_count(&self) -> usize {
        guard(&self.state).orders.len()
    }

    /// Make every later transaction error at `point`; `None` clears it
    pub fn fail_at(&self, point: Option<FailPoint>) {
        *guard(&self.fail_point) = point;
    }

    /// Overwrite a stored total, simulating drift between creation and payment
    pub fn tamper_total(&self, order_id: Uuid, total: Decimal) {
        if let Some(order) = guard(&self.state).orders.get_mut(&order_id) {
            order.total_amount = total;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError> {
        let lock = self.writer.clone().lock_owned().await;
        let staged = guard(&self.state).clone();
        Ok(Box::new(InMemoryTransaction {
            _lock: lock,
            staged,
            target: self.state.clone(),
            fail_point: *guard(&self.fail_point),
        }))
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(guard(&self.state).orders.get(&id).cloned())
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(guard(&self.state)
            .orders
            .values()
            .find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id))
            .cloned())
    }
}

pub struct InMemoryTransaction {
    _lock: OwnedMutexGuard<()>,
    staged: MemoryState,
    target: Arc<Mutex<MemoryState>>,
    fail_point: Option<FailPoint>,
}

impl InMemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_point == Some(point) {
            return Err(StoreError::database(std::io::Error::other(format!(
                "injected failure at {:?}",
                point
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if let Some(item) = order
            .items
            .iter()
            .find(|item| !self.staged.products.contains_key(&item.product_id))
        {
            return Err(StoreError::UnknownProduct(item.product_id));
        }
        if self
            .staged
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(StoreError::Corrupt(format!("duplicate order number {}", order.order_number)));
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn take_cart_items(&mut self, customer_id: &str) -> Result<Vec<CartItem>, StoreError> {
        Ok(self.staged.carts.remove(customer_id).unwrap_or_default())
    }

    async fn remove_cart_items(&mut self, customer_id: &str, product_ids: &[Uuid]) -> Result<u64, StoreError> {
        let Some(cart) = self.staged.carts.get_mut(customer_id) else {
            return Ok(0);
        };
        let before = cart.len();
        cart.retain(|item| !product_ids.contains(&item.product_id));
        Ok((before - cart.len()) as u64)
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn save_payment_state(&mut self, order: &Order) -> Result<(), StoreError> {
        if let Some(reference) = &order.payment_intent_id {
            let taken = self
                .staged
                .orders
                .values()
                .any(|o| o.id != order.id && o.payment_intent_id.as_ref() == Some(reference));
            if taken {
                return Err(StoreError::DuplicatePaymentReference(reference.clone()));
            }
        }
        let stored = self
            .staged
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::Corrupt(format!("order {} vanished", order.id)))?;
        stored.status = order.status;
        stored.payment_status = order.payment_status;
        stored.payment_method = order.payment_method.clone();
        stored.payment_intent_id = order.payment_intent_id.clone();
        stored.payment_attempts = order.payment_attempts;
        stored.payment_claimed_at = order.payment_claimed_at;
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn record_sale(&mut self, product_id: Uuid, quantity: i32) -> Result<Option<StockLevel>, StoreError> {
        self.check(FailPoint::RecordSale)?;
        Ok(self.staged.products.get_mut(&product_id).map(|stock| {
            stock.record_sale(quantity);
            stock.clone()
        }))
    }

    async fn insert_inventory_alert(&mut self, alert: &InventoryAlert) -> Result<(), StoreError> {
        self.check(FailPoint::InsertAlert)?;
        self.staged.alerts.push(alert.clone());
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        self.check(FailPoint::InsertNotification)?;
        self.staged.notifications.push(notification.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        *guard(&this.target) = this.staged;
        Ok(())
    }
}

/// Publisher that keeps every event for later inspection
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, String, String)>>,
}

impl RecordingPublisher {
    pub fn topics(&self) -> Vec<String> {
        guard(&self.events).iter().map(|(topic, _, _)| topic.clone()).collect()
    }

    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        guard(&self.events)
            .iter()
            .filter(|(t, _, _)| t == topic)
            .filter_map(|(_, _, payload)| serde_json::from_str(payload).ok())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        guard(&self.events).push((topic.to_string(), key.to_string(), payload.to_string()));
        Ok(())
    }
}

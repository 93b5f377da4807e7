use async_trait::async_trait;
use bazaar_catalog::StockLevel;
use uuid::Uuid;

use crate::models::{CartItem, InventoryAlert, Notification, Order};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("product {0} does not exist")]
    UnknownProduct(Uuid),

    #[error("payment reference {0} is already attached to another order")]
    DuplicatePaymentReference(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn database<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Database(Box::new(err))
    }
}

/// Storage port for the order aggregate.
///
/// Plain reads go straight to the store. Every multi-step mutation runs on an
/// [`OrderTransaction`] so that either all of its writes land or none do.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>, StoreError>;
}

/// Unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Insert the order and all of its items
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Delete the customer's whole cart and return the rows that were deleted.
    /// A concurrent taker sees an empty cart.
    async fn take_cart_items(&mut self, customer_id: &str) -> Result<Vec<CartItem>, StoreError>;

    /// Remove the given products from the customer's cart, returning how many went
    async fn remove_cart_items(&mut self, customer_id: &str, product_ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Read the order and hold its row lock until the transaction ends
    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Persist status, payment status, method, intent reference and attempt counter
    async fn save_payment_state(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Decrement inventory and bump the sold counter. `None` if the product is gone.
    async fn record_sale(&mut self, product_id: Uuid, quantity: i32) -> Result<Option<StockLevel>, StoreError>;

    async fn insert_inventory_alert(&mut self, alert: &InventoryAlert) -> Result<(), StoreError>;

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

use async_trait::async_trait;
use bazaar_catalog::StockLevel;
use bazaar_order::models::{CartItem, InventoryAlert, Notification, Order, OrderItem};
use bazaar_order::repository::{OrderStore, OrderTransaction, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "SELECT id, order_number, customer_id, shipping_address, billing_address, \
     subtotal, tax_amount, shipping_amount, discount_amount, total_amount, currency, status, \
     payment_status, payment_method, payment_intent_id, payment_attempts, payment_claimed_at, created_at, \
     updated_at FROM orders";

pub struct PgOrderStore {
    pool: PgPool,
    default_low_stock_threshold: i32,
}

impl PgOrderStore {
    pub fn new(pool: PgPool, default_low_stock_threshold: i32) -> Self {
        Self {
            pool,
            default_low_stock_threshold,
        }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_id: String,
    shipping_address: Value,
    billing_address: Value,
    subtotal: Decimal,
    tax_amount: Decimal,
    shipping_amount: Decimal,
    discount_amount: Decimal,
    total_amount: Decimal,
    currency: String,
    status: String,
    payment_status: String,
    payment_method: Option<String>,
    payment_intent_id: Option<String>,
    payment_attempts: i32,
    payment_claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    vendor_id: Uuid,
    product_name: String,
    product_image: Option<String>,
    quantity: i32,
    unit_price: Decimal,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    product_id: Uuid,
    vendor_id: Uuid,
    product_name: String,
    product_image: Option<String>,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(sqlx::FromRow)]
struct StockRow {
    id: Uuid,
    name: String,
    vendor_id: Uuid,
    inventory: i32,
    sold_count: i32,
    low_stock_threshold: i32,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            customer_id: self.customer_id,
            items,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            subtotal: self.subtotal,
            tax_amount: self.tax_amount,
            shipping_amount: self.shipping_amount,
            discount_amount: self.discount_amount,
            total_amount: self.total_amount,
            currency: self.currency,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            payment_status: self.payment_status.parse().map_err(StoreError::Corrupt)?,
            payment_method: self.payment_method,
            payment_intent_id: self.payment_intent_id,
            payment_attempts: self.payment_attempts,
            payment_claimed_at: self.payment_claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            vendor_id: row.vendor_id,
            product_name: row.product_name,
            product_image: row.product_image,
            quantity: row.quantity,
            unit_price: row.unit_price,
            created_at: row.created_at,
        }
    }
}

async fn load_items(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
    let rows: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, order_id, product_id, vendor_id, product_name, product_image, quantity, unit_price, created_at \
         FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(StoreError::database)?;

    Ok(rows.into_iter().map(OrderItem::from).collect())
}

async fn hydrate(conn: &mut PgConnection, row: Option<OrderRow>) -> Result<Option<Order>, StoreError> {
    match row {
        Some(row) => {
            let items = load_items(conn, row.id).await?;
            Ok(Some(row.into_order(items)?))
        }
        None => Ok(None),
    }
}

async fn order_by_id(conn: &mut PgConnection, id: Uuid, for_update: bool) -> Result<Option<Order>, StoreError> {
    let sql = if for_update {
        format!("{} WHERE id = $1 FOR UPDATE", ORDER_COLUMNS)
    } else {
        format!("{} WHERE id = $1", ORDER_COLUMNS)
    };
    let row: Option<OrderRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(StoreError::database)?;
    hydrate(conn, row).await
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_foreign_key_violation())
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::database)?;
        Ok(Box::new(PgOrderTransaction {
            tx,
            default_low_stock_threshold: self.default_low_stock_threshold,
        }))
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::database)?;
        order_by_id(&mut conn, id, false).await
    }

    async fn find_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::database)?;
        let sql = format!("{} WHERE payment_intent_id = $1", ORDER_COLUMNS);
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(payment_intent_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StoreError::database)?;
        hydrate(&mut conn, row).await
    }
}

/// Wraps one Postgres transaction; sqlx rolls it back when dropped uncommitted
pub struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
    default_low_stock_threshold: i32,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, customer_id, shipping_address, billing_address,
                subtotal, tax_amount, shipping_amount, discount_amount, total_amount, currency,
                status, payment_status, payment_method, payment_intent_id, payment_attempts,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(order.subtotal)
        .bind(order.tax_amount)
        .bind(order.shipping_amount)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_method)
        .bind(&order.payment_intent_id)
        .bind(order.payment_attempts)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, vendor_id, product_name, product_image, quantity, unit_price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.vendor_id)
            .bind(&item.product_name)
            .bind(&item.product_image)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::UnknownProduct(item.product_id)
                } else {
                    StoreError::database(e)
                }
            })?;
        }
        Ok(())
    }

    async fn take_cart_items(&mut self, customer_id: &str) -> Result<Vec<CartItem>, StoreError> {
        // Row locks taken by the DELETE make a concurrent checkout wait, then find nothing
        let rows: Vec<CartItemRow> = sqlx::query_as(
            r#"
            WITH taken AS (
                DELETE FROM cart_items WHERE customer_id = $1
                RETURNING product_id, vendor_id, product_name, product_image, quantity, unit_price, created_at
            )
            SELECT product_id, vendor_id, product_name, product_image, quantity, unit_price
            FROM taken ORDER BY created_at, product_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;

        Ok(rows
            .into_iter()
            .map(|row| CartItem {
                product_id: row.product_id,
                vendor_id: row.vendor_id,
                product_name: row.product_name,
                product_image: row.product_image,
                quantity: row.quantity,
                unit_price: row.unit_price,
            })
            .collect())
    }

    async fn remove_cart_items(&mut self, customer_id: &str, product_ids: &[Uuid]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE customer_id = $1 AND product_id = ANY($2)")
            .bind(customer_id)
            .bind(product_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::database)?;
        Ok(result.rows_affected())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        order_by_id(&mut self.tx, id, true).await
    }

    async fn save_payment_state(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, payment_method = $4, payment_intent_id = $5,
                payment_attempts = $6, payment_claimed_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_method)
        .bind(&order.payment_intent_id)
        .bind(order.payment_attempts)
        .bind(order.payment_claimed_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicatePaymentReference(order.payment_intent_id.clone().unwrap_or_default())
            } else {
                StoreError::database(e)
            }
        })?;
        Ok(())
    }

    async fn record_sale(&mut self, product_id: Uuid, quantity: i32) -> Result<Option<StockLevel>, StoreError> {
        let row: Option<StockRow> = sqlx::query_as(
            r#"
            UPDATE products
            SET inventory = inventory - $2, sold_count = sold_count + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, vendor_id, inventory, sold_count,
                COALESCE(low_stock_threshold, $3) AS low_stock_threshold
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(self.default_low_stock_threshold)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;

        Ok(row.map(|row| StockLevel {
            product_id: row.id,
            product_name: row.name,
            vendor_id: row.vendor_id,
            inventory: row.inventory,
            sold_count: row.sold_count,
            low_stock_threshold: row.low_stock_threshold,
        }))
    }

    async fn insert_inventory_alert(&mut self, alert: &InventoryAlert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_alerts (id, product_id, vendor_id, alert_type, current_stock, threshold, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(alert.id)
        .bind(alert.product_id)
        .bind(alert.vendor_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.current_stock)
        .bind(alert.threshold)
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_id, recipient_type, kind, title, message, priority, order_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.recipient_id)
        .bind(notification.recipient_type.as_str())
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.priority.as_str())
        .bind(notification.order_id)
        .bind(notification.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::database)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await.map_err(StoreError::database)
    }
}

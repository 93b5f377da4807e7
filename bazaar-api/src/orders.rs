use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_order::{CheckoutDetails, Order, OrderItem};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub shipping_address: serde_json::Value,
    #[serde(default)]
    pub billing_address: serde_json::Value,
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id,
            vendor_id: item.vendor_id,
            product_name: item.product_name.clone(),
            product_image: item.product_image.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            items: order.items.iter().map(OrderItemResponse::from).collect(),
            order_number: order.order_number,
            status: order.status.as_str().to_string(),
            payment_status: order.payment_status.as_str().to_string(),
            payment_method: order.payment_method,
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            shipping_amount: order.shipping_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            currency: order.currency,
            created_at: order.created_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/checkout
/// Turn the caller's cart into an order
pub async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    if let Some(method) = &req.payment_method {
        if state.orchestrator.provider(method).is_none() {
            return Err(AppError::ValidationError(format!("{} is not available", method)));
        }
    }

    let order = state
        .orders
        .checkout_cart(
            &claims.sub,
            CheckoutDetails {
                shipping_address: req.shipping_address,
                billing_address: req.billing_address,
                payment_method: req.payment_method,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.get_order(id).await?;
    if order.customer_id != claims.sub {
        // Do not reveal other customers' order ids
        return Err(AppError::NotFoundError("Order not found".to_string()));
    }
    Ok(Json(order.into()))
}

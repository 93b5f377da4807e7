use async_trait::async_trait;
use bazaar_core::PaymentStatus;
use bazaar_shared::models::events::{
    OrderPaidEvent, PaymentFailedEvent, ReconciliationFailedEvent, ORDER_PAID_TOPIC,
    PAYMENT_FAILED_TOPIC, RECONCILIATION_FAILED_TOPIC,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::models::Order;

/// Outbound event sink (Kafka in production)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Counters for payment traffic
pub trait PaymentMetrics: Send + Sync {
    fn payment_attempt(&self, provider: &str, status: PaymentStatus);
    fn reconciliation_failure(&self, provider: &str);
}

pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _key: &str,
        _payload: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

pub struct NoopMetrics;

impl PaymentMetrics for NoopMetrics {
    fn payment_attempt(&self, _provider: &str, _status: PaymentStatus) {}
    fn reconciliation_failure(&self, _provider: &str) {}
}

/// Post-commit side channel. Nothing here may fail the caller: publishing errors
/// are logged and dropped.
#[derive(Clone)]
pub struct PaymentTelemetry {
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<dyn PaymentMetrics>,
}

impl PaymentTelemetry {
    pub fn new(publisher: Arc<dyn EventPublisher>, metrics: Arc<dyn PaymentMetrics>) -> Self {
        Self { publisher, metrics }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopPublisher), Arc::new(NoopMetrics))
    }

    async fn emit<T: Serialize>(&self, topic: &str, key: &str, event: &T) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {} event: {}", topic, e);
                return;
            }
        };
        if let Err(e) = self.publisher.publish(topic, key, &payload).await {
            warn!("Failed to publish {} event for {}: {}", topic, key, e);
        }
    }

    pub async fn log_order_paid(&self, order: &Order, payment_id: &str) {
        let event = OrderPaidEvent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer_id.clone(),
            payment_method: order.payment_method.clone(),
            payment_id: payment_id.to_string(),
            total_amount: order.total_amount,
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.emit(ORDER_PAID_TOPIC, &order.id.to_string(), &event).await;
    }

    pub async fn log_payment_failed(&self, order: &Order, reason: &str) {
        let event = PaymentFailedEvent {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_id: order.customer_id.clone(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.emit(PAYMENT_FAILED_TOPIC, &order.id.to_string(), &event).await;
    }

    /// Out-of-band alert for a callback that was acknowledged but not applied
    pub async fn log_reconciliation_failure(&self, provider: &str, payment_id: Option<&str>, err: &str) {
        self.metrics.reconciliation_failure(provider);
        let event = ReconciliationFailedEvent {
            provider: provider.to_string(),
            payment_id: payment_id.map(str::to_string),
            error: err.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.emit(RECONCILIATION_FAILED_TOPIC, payment_id.unwrap_or(provider), &event).await;
    }

    pub fn log_payment_attempt(&self, provider: &str, status: PaymentStatus) {
        self.metrics.payment_attempt(provider, status);
    }
}

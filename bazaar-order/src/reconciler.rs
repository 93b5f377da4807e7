use bazaar_core::{PaymentError, PaymentStatus, PaymentVerifyResponse};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::manager::{FinalizeOutcome, OrderError, OrderManager};
use crate::models::Order;
use crate::orchestrator::PaymentOrchestrator;
use crate::telemetry::PaymentTelemetry;

/// What happened to a provider notification
#[derive(Debug)]
pub enum CallbackOutcome {
    /// The order was finalized (or already was)
    Finalized(FinalizeOutcome),
    /// Provider reports the attempt as still in progress
    StillPending,
    /// No order carries this payment reference
    NoMatchingOrder,
    /// Processing failed; acknowledged to the provider and alerted internally
    Absorbed(String),
    /// Signature did not verify; the request is not authentic
    Rejected,
}

impl CallbackOutcome {
    /// Only an unauthentic request may be answered with a non-success status
    pub fn is_rejected(&self) -> bool {
        matches!(self, CallbackOutcome::Rejected)
    }
}

/// Result of a client-initiated status check
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub verification: PaymentVerifyResponse,
    pub order: Order,
}

/// Converges provider notifications and client polling onto the order manager
pub struct PaymentReconciler {
    manager: Arc<OrderManager>,
    orchestrator: Arc<PaymentOrchestrator>,
    telemetry: PaymentTelemetry,
}

impl PaymentReconciler {
    pub fn new(manager: Arc<OrderManager>, orchestrator: Arc<PaymentOrchestrator>, telemetry: PaymentTelemetry) -> Self {
        Self {
            manager,
            orchestrator,
            telemetry,
        }
    }

    /// Handle a raw provider callback. Every failure except a bad signature is
    /// absorbed here so the provider never retries because of our own errors.
    pub async fn reconcile_callback(&self, provider: &str, payload: &[u8], signature: Option<&str>) -> CallbackOutcome {
        let verification = match self.orchestrator.handle_callback(provider, payload, signature).await {
            Ok(verification) => verification,
            Err(PaymentError::InvalidSignature) => {
                warn!(provider, "Rejected callback with invalid signature");
                return CallbackOutcome::Rejected;
            }
            Err(e) => {
                error!(provider, "Failed to parse callback: {}", e);
                self.telemetry
                    .log_reconciliation_failure(provider, None, &e.to_string())
                    .await;
                return CallbackOutcome::Absorbed(e.to_string());
            }
        };

        match self.apply(&verification).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(provider, payment_id = %verification.payment_id, "Failed to reconcile callback: {}", e);
                self.telemetry
                    .log_reconciliation_failure(provider, Some(&verification.payment_id), &e.to_string())
                    .await;
                CallbackOutcome::Absorbed(e.to_string())
            }
        }
    }

    /// Dispatch a provider verdict to the order that carries its reference
    pub async fn apply(&self, verification: &PaymentVerifyResponse) -> Result<CallbackOutcome, OrderError> {
        let Some(order) = self.manager.find_by_payment_intent(&verification.payment_id).await? else {
            warn!(payment_id = %verification.payment_id, "No order found for payment reference, ignoring");
            return Ok(CallbackOutcome::NoMatchingOrder);
        };

        if let Some(amount) = verification.amount {
            let expected = self.expected_charge(&order);
            if amount != expected {
                warn!(
                    order_id = %order.id,
                    payment_id = %verification.payment_id,
                    reported = %amount,
                    expected = %expected,
                    order_total = %order.total_amount,
                    "Provider reported a different amount than was charged"
                );
            }
        }

        let outcome = match verification.status {
            PaymentStatus::Success => {
                if let Some(receipt) = &verification.provider_reference {
                    info!(order_id = %order.id, receipt = %receipt, "Provider confirmed payment");
                }
                CallbackOutcome::Finalized(self.manager.finalize_success(order.id, &verification.payment_id).await?)
            }
            PaymentStatus::Failed => {
                CallbackOutcome::Finalized(self.manager.finalize_failure(order.id, &verification.message).await?)
            }
            PaymentStatus::Pending => CallbackOutcome::StillPending,
        };
        Ok(outcome)
    }

    fn expected_charge(&self, order: &Order) -> Decimal {
        order
            .payment_method
            .as_deref()
            .and_then(|method| self.orchestrator.provider(method))
            .map(|provider| provider.charge_amount(order.total_amount))
            .unwrap_or(order.total_amount)
    }

    /// Polling fallback for clients waiting on an asynchronous provider.
    /// Safe to call repeatedly.
    pub async fn verify_payment(&self, customer_id: &str, payment_id: &str, method: &str) -> Result<VerifiedPayment, OrderError> {
        let order = self
            .manager
            .find_by_payment_intent(payment_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(payment_id.to_string()))?;
        if order.customer_id != customer_id {
            return Err(OrderError::Forbidden);
        }

        if order.is_paid() {
            let verification = PaymentVerifyResponse::new(payment_id, PaymentStatus::Success, "Payment already confirmed");
            return Ok(VerifiedPayment { verification, order });
        }

        let verification = self
            .orchestrator
            .verify_payment(method, payment_id)
            .await
            .map_err(|e| OrderError::InvalidRequest(e.to_string()))?;

        let order = match verification.status {
            PaymentStatus::Success => self
                .manager
                .finalize_success(order.id, payment_id)
                .await?
                .into_order(),
            PaymentStatus::Failed => self
                .manager
                .finalize_failure(order.id, &verification.message)
                .await?
                .into_order(),
            PaymentStatus::Pending => order,
        };

        Ok(VerifiedPayment { verification, order })
    }
}

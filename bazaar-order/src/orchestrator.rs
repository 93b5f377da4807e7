use bazaar_core::{
    CustomerInfo, PaymentError, PaymentIntentRequest, PaymentMetadata, PaymentProvider,
    PaymentProviderRegistry, PaymentResponse, PaymentStatus, PaymentVerifyResponse,
    ProviderSummary,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::telemetry::PaymentTelemetry;

/// One attempt to start a payment, in provider-neutral terms
#[derive(Debug, Clone, Default)]
pub struct PaymentRequest {
    pub method: String,
    pub amount: Decimal,
    pub currency: String,
    pub metadata: PaymentMetadata,
    pub customer: Option<CustomerInfo>,
    pub return_url: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Routes payment work to the right provider and turns every provider failure
/// into a typed response.
pub struct PaymentOrchestrator {
    registry: Arc<PaymentProviderRegistry>,
    timeout: Duration,
    telemetry: PaymentTelemetry,
}

impl PaymentOrchestrator {
    pub fn new(registry: Arc<PaymentProviderRegistry>, timeout: Duration, telemetry: PaymentTelemetry) -> Self {
        Self {
            registry,
            timeout,
            telemetry,
        }
    }

    pub fn available_methods(&self) -> Vec<ProviderSummary> {
        self.registry.available()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn provider(&self, method: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.registry.get(method)
    }

    /// Start a payment attempt. Never returns an error: validation problems,
    /// missing providers, provider errors and timeouts all come back as `FAILED`.
    pub async fn process_payment(&self, request: PaymentRequest) -> PaymentResponse {
        if let Err(message) = validate(&request) {
            warn!(method = %request.method, "Rejected payment request: {}", message);
            return PaymentResponse::failed(message);
        }

        let Some(provider) = self.registry.get(&request.method) else {
            warn!(method = %request.method, "Requested payment method is not available");
            return PaymentResponse::failed(format!("{} is not available", request.method));
        };

        let order_id = request.metadata.order_id;
        let intent = PaymentIntentRequest {
            amount: request.amount,
            currency: request.currency,
            metadata: merge_customer(request.metadata, request.customer),
            return_url: request.return_url,
            idempotency_key: request.idempotency_key,
        };

        let result = tokio::time::timeout(self.timeout, provider.create_payment_intent(&intent))
            .await
            .unwrap_or(Err(PaymentError::Timeout));

        let response = match result {
            Ok(response) => {
                info!(
                    provider = provider.id(),
                    order_id = ?order_id,
                    payment_id = ?response.payment_id,
                    status = response.status.as_str(),
                    "Payment intent created"
                );
                response
            }
            Err(e) => {
                error!(provider = provider.id(), order_id = ?order_id, "Payment intent failed: {}", e);
                PaymentResponse::failed(e.to_string())
            }
        };

        self.telemetry.log_payment_attempt(provider.id(), response.status);
        response
    }

    /// Ask the provider about an existing attempt.
    ///
    /// Only an unknown method is an error. Provider failures and timeouts report
    /// `PENDING` so that a flaky status check never fails an order.
    pub async fn verify_payment(&self, method: &str, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
        let provider = self
            .registry
            .get(method)
            .ok_or_else(|| PaymentError::Validation(format!("{} is not available", method)))?;

        let result = tokio::time::timeout(self.timeout, provider.verify_payment(payment_id))
            .await
            .unwrap_or(Err(PaymentError::Timeout));

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_transient() {
                    warn!(provider = method, payment_id, "Payment status check timed out: {}", e);
                } else {
                    error!(provider = method, payment_id, "Payment status check failed: {}", e);
                }
                Ok(PaymentVerifyResponse::new(
                    payment_id,
                    PaymentStatus::Pending,
                    "Payment status unavailable, try again later",
                ))
            }
        }
    }

    /// Authenticate and parse a provider notification
    pub async fn handle_callback(
        &self,
        method: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentVerifyResponse, PaymentError> {
        let provider = self
            .registry
            .get(method)
            .ok_or_else(|| PaymentError::CallbackUnsupported(method.to_string()))?;
        provider.handle_callback(payload, signature).await
    }
}

fn validate(request: &PaymentRequest) -> Result<(), String> {
    if request.method.trim().is_empty() {
        return Err("Payment method is required".to_string());
    }
    if request.amount <= Decimal::ZERO {
        return Err("Payment amount must be greater than zero".to_string());
    }
    if request.metadata.order_id.is_none() {
        return Err("Order id is required".to_string());
    }
    Ok(())
}

fn merge_customer(mut metadata: PaymentMetadata, customer: Option<CustomerInfo>) -> PaymentMetadata {
    if let Some(customer) = customer {
        metadata.email = customer.email.or(metadata.email);
        metadata.phone = customer.phone.or(metadata.phone);
        metadata.name = customer.name.or(metadata.name);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Provider double that records what it was asked to do
    #[derive(Default)]
    struct ScriptedProvider {
        seen: Mutex<Vec<PaymentIntentRequest>>,
        fail_with: Option<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl PaymentProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "mpesa"
        }

        fn display_name(&self) -> &'static str {
            "M-Pesa"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn create_payment_intent(
            &self,
            request: &PaymentIntentRequest,
        ) -> Result<PaymentResponse, PaymentError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().unwrap().push(request.clone());
            match &self.fail_with {
                Some(message) => Err(PaymentError::provider("mpesa", message.clone())),
                None => Ok(PaymentResponse::pending("ws_CO_1", "Check your phone")),
            }
        }

        async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(PaymentVerifyResponse::new(payment_id, PaymentStatus::Success, "ok"))
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> PaymentOrchestrator {
        let registry = PaymentProviderRegistry::new().with(provider);
        PaymentOrchestrator::new(Arc::new(registry), Duration::from_millis(200), PaymentTelemetry::noop())
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            method: "mpesa".to_string(),
            amount: dec!(28.05),
            currency: "KES".to_string(),
            metadata: PaymentMetadata {
                order_id: Some(Uuid::new_v4()),
                order_number: Some("ORD-1-ABCD".to_string()),
                ..Default::default()
            },
            customer: Some(CustomerInfo {
                phone: Some("0712345678".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_structural_validation_fails_fast() {
        let provider = Arc::new(ScriptedProvider::default());
        let orchestrator = orchestrator(provider.clone());

        let mut no_method = request();
        no_method.method = String::new();
        let mut zero_amount = request();
        zero_amount.amount = Decimal::ZERO;
        let mut no_order = request();
        no_order.metadata.order_id = None;

        for bad in [no_method, zero_amount, no_order] {
            let response = orchestrator.process_payment(bad).await;
            assert_eq!(response.status, PaymentStatus::Failed);
            assert!(!response.success);
        }
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_available() {
        let orchestrator = orchestrator(Arc::new(ScriptedProvider::default()));
        let mut req = request();
        req.method = "paypal".to_string();

        let response = orchestrator.process_payment(req).await;
        assert_eq!(response.status, PaymentStatus::Failed);
        assert_eq!(response.message, "paypal is not available");
    }

    #[tokio::test]
    async fn test_customer_contact_is_forwarded() {
        let provider = Arc::new(ScriptedProvider::default());
        let orchestrator = orchestrator(provider.clone());

        let response = orchestrator.process_payment(request()).await;

        assert_eq!(response.status, PaymentStatus::Pending);
        assert_eq!(response.payment_id.as_deref(), Some("ws_CO_1"));
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].metadata.phone.as_deref(), Some("0712345678"));
        assert_eq!(seen[0].metadata.order_number.as_deref(), Some("ORD-1-ABCD"));
    }

    #[tokio::test]
    async fn test_provider_error_becomes_failed_response() {
        let provider = Arc::new(ScriptedProvider {
            fail_with: Some("Invalid Access Token".to_string()),
            ..Default::default()
        });
        let response = orchestrator(provider).process_payment(request()).await;

        assert_eq!(response.status, PaymentStatus::Failed);
        assert!(response.message.contains("Invalid Access Token"));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let orchestrator = orchestrator(provider);

        let response = orchestrator.process_payment(request()).await;
        assert_eq!(response.status, PaymentStatus::Failed);

        let verify = orchestrator.verify_payment("mpesa", "ws_CO_1").await.unwrap();
        assert_eq!(verify.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_verify_unknown_method_is_an_error() {
        let orchestrator = orchestrator(Arc::new(ScriptedProvider::default()));
        let result = orchestrator.verify_payment("paypal", "x").await;
        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }
}

use bazaar_core::{CustomerInfo, PaymentMetadata, PaymentResponse, PaymentStatus};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::manager::{OrderError, OrderManager, PaymentClaim};
use crate::models::Order;
use crate::orchestrator::{PaymentOrchestrator, PaymentRequest};

/// Client request to pay for an existing order
#[derive(Debug, Clone, Default)]
pub struct CreatePayment {
    pub order_id: Uuid,
    pub payment_method: String,
    pub return_url: Option<String>,
    pub idempotency_key: Option<String>,
    pub customer: CustomerInfo,
}

const IN_PROGRESS_MESSAGE: &str = "A payment request is already in progress for this order";

/// Guards in front of the orchestrator: ownership, the paid barrier, total
/// integrity and duplicate push protection.
///
/// Providers that cannot deduplicate by idempotency key are pushed at most
/// once at a time per order: the push is claimed on the order row first.
pub struct CheckoutService {
    manager: Arc<OrderManager>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl CheckoutService {
    pub fn new(manager: Arc<OrderManager>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { manager, orchestrator }
    }

    pub async fn create_payment(&self, customer_id: &str, command: CreatePayment) -> Result<PaymentResponse, OrderError> {
        let mut order = self.manager.get_order(command.order_id).await?;
        if order.customer_id != customer_id {
            return Err(OrderError::Forbidden);
        }
        if order.is_paid() {
            return Err(OrderError::AlreadyPaid(order.order_number));
        }

        self.manager.verify_integrity(&order)?;

        let method = command.payment_method.clone();
        let exclusive = self
            .orchestrator
            .provider(&method)
            .is_some_and(|p| !p.supports_idempotency_key());

        if exclusive {
            if let Some(existing) = self.reuse_pending_attempt(&mut order, &method).await? {
                return Ok(existing);
            }
            let ttl = chrono::Duration::from_std(self.orchestrator.timeout() * 2)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
            match self.manager.claim_payment_attempt(order.id, &method, ttl).await? {
                PaymentClaim::Claimed(claimed) => order = claimed,
                PaymentClaim::InFlight(reference) => {
                    info!(order_id = %order.id, provider = %method, "Push already in flight, not pushing again");
                    return Ok(PaymentResponse::in_progress(reference, IN_PROGRESS_MESSAGE));
                }
            }
        }

        let idempotency_key = command
            .idempotency_key
            .clone()
            .unwrap_or_else(|| order.idempotency_key(&command.payment_method));

        let response = self
            .orchestrator
            .process_payment(PaymentRequest {
                method: command.payment_method.clone(),
                amount: order.total_amount,
                currency: order.currency.clone(),
                metadata: PaymentMetadata {
                    order_id: Some(order.id),
                    order_number: Some(order.order_number.clone()),
                    customer_id: Some(order.customer_id.clone()),
                    ..Default::default()
                },
                customer: Some(command.customer),
                return_url: command.return_url,
                idempotency_key: Some(idempotency_key),
            })
            .await;

        if response.status != PaymentStatus::Failed {
            if let Some(payment_id) = &response.payment_id {
                if let Err(e) = self
                    .manager
                    .attach_payment_intent(order.id, &method, payment_id, exclusive)
                    .await
                {
                    error!(
                        order_id = %order.id,
                        provider = %method,
                        payment_id = %payment_id,
                        "Provider accepted a payment that could not be recorded: {}",
                        e
                    );
                    if exclusive {
                        self.release_claim(order.id).await;
                    }
                    return Err(e);
                }
                return Ok(response);
            }
        }

        if exclusive {
            self.release_claim(order.id).await;
        }
        Ok(response)
    }

    async fn release_claim(&self, order_id: Uuid) {
        if let Err(e) = self.manager.release_payment_claim(order_id).await {
            warn!(order_id = %order_id, "Failed to release payment claim: {}", e);
        }
    }

    /// An order that already has a pending reference from the same provider
    /// is checked with the provider before pushing again.
    async fn reuse_pending_attempt(&self, order: &mut Order, method: &str) -> Result<Option<PaymentResponse>, OrderError> {
        let Some(payment_id) = order.pending_reference(method).map(str::to_string) else {
            return Ok(None);
        };

        let verification = self.orchestrator.verify_payment(method, &payment_id).await.map_err(|e| {
            OrderError::InvalidRequest(e.to_string())
        })?;

        match verification.status {
            PaymentStatus::Pending => {
                info!(order_id = %order.id, payment_id = %payment_id, "Attempt still pending, not pushing again");
                Ok(Some(PaymentResponse::pending(payment_id, IN_PROGRESS_MESSAGE)))
            }
            PaymentStatus::Success => {
                self.manager.finalize_success(order.id, &payment_id).await?;
                Err(OrderError::AlreadyPaid(order.order_number.clone()))
            }
            PaymentStatus::Failed => {
                warn!(order_id = %order.id, payment_id = %payment_id, "Previous attempt failed, starting a new one");
                *order = self
                    .manager
                    .finalize_failure(order.id, &verification.message)
                    .await?
                    .into_order();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOrderStore;
    use crate::manager::CheckoutDetails;
    use crate::models::{CartItem, OrderPaymentStatus};
    use crate::telemetry::PaymentTelemetry;
    use async_trait::async_trait;
    use bazaar_catalog::PricingPolicy;
    use bazaar_core::{
        PaymentError, PaymentIntentRequest, PaymentProvider, PaymentProviderRegistry,
        PaymentVerifyResponse,
    };
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubProvider {
        id: &'static str,
        idempotent: bool,
        verify_status: PaymentStatus,
        push_delay: Option<Duration>,
        pushes: Mutex<Vec<PaymentIntentRequest>>,
    }

    impl StubProvider {
        fn new(id: &'static str, idempotent: bool, verify_status: PaymentStatus) -> Self {
            Self {
                id,
                idempotent,
                verify_status,
                push_delay: None,
                pushes: Mutex::new(Vec::new()),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.push_delay = Some(delay);
            self
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentProvider for StubProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            self.id
        }

        fn is_available(&self) -> bool {
            true
        }

        fn supports_idempotency_key(&self) -> bool {
            self.idempotent
        }

        async fn create_payment_intent(
            &self,
            request: &PaymentIntentRequest,
        ) -> Result<PaymentResponse, PaymentError> {
            if let Some(delay) = self.push_delay {
                tokio::time::sleep(delay).await;
            }
            let mut pushes = self.pushes.lock().unwrap();
            if request.metadata.phone.is_none() {
                return Err(PaymentError::Validation("phone number is required".to_string()));
            }
            pushes.push(request.clone());
            Ok(PaymentResponse::pending(format!("{}_{}", self.id, pushes.len()), "started"))
        }

        async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
            Ok(PaymentVerifyResponse::new(payment_id, self.verify_status, "checked"))
        }
    }

    struct Fixture {
        store: Arc<InMemoryOrderStore>,
        manager: Arc<OrderManager>,
        service: CheckoutService,
        provider: Arc<StubProvider>,
    }

    fn fixture(provider: StubProvider) -> Fixture {
        let store = Arc::new(InMemoryOrderStore::new());
        let manager = Arc::new(OrderManager::new(
            store.clone(),
            PricingPolicy::default(),
            PaymentTelemetry::noop(),
        ));
        let provider = Arc::new(provider);
        let registry = PaymentProviderRegistry::new().with(provider.clone());
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            Arc::new(registry),
            Duration::from_secs(1),
            PaymentTelemetry::noop(),
        ));
        let service = CheckoutService::new(manager.clone(), orchestrator);
        Fixture { store, manager, service, provider }
    }

    async fn place_order(f: &Fixture) -> Order {
        let vendor = Uuid::new_v4();
        let product = f.store.add_product("Sisal Basket", vendor, 20, 5);
        f.store.set_cart(
            "cust-1",
            vec![CartItem {
                product_id: product,
                vendor_id: vendor,
                product_name: "Sisal Basket".to_string(),
                product_image: None,
                quantity: 2,
                unit_price: dec!(10.00),
            }],
        );
        f.manager
            .checkout_cart(
                "cust-1",
                CheckoutDetails {
                    shipping_address: serde_json::json!({}),
                    billing_address: serde_json::json!({}),
                    payment_method: None,
                },
            )
            .await
            .unwrap()
    }

    fn command(order_id: Uuid, method: &str) -> CreatePayment {
        CreatePayment {
            order_id,
            payment_method: method.to_string(),
            customer: CustomerInfo {
                phone: Some("254712345678".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_payment_attaches_reference() {
        let f = fixture(StubProvider::new("stripe", true, PaymentStatus::Pending));
        let order = place_order(&f).await;

        let response = f.service.create_payment("cust-1", command(order.id, "stripe")).await.unwrap();

        assert_eq!(response.payment_id.as_deref(), Some("stripe_1"));
        let stored = f.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_intent_id.as_deref(), Some("stripe_1"));
        assert_eq!(stored.payment_method.as_deref(), Some("stripe"));

        let pushes = f.provider.pushes.lock().unwrap();
        assert_eq!(pushes[0].amount, dec!(22.00));
        assert_eq!(pushes[0].idempotency_key, Some(format!("{}-stripe-0", order.id)));
    }

    #[tokio::test]
    async fn test_other_customers_order_is_forbidden() {
        let f = fixture(StubProvider::new("stripe", true, PaymentStatus::Pending));
        let order = place_order(&f).await;

        let result = f.service.create_payment("cust-2", command(order.id, "stripe")).await;
        assert!(matches!(result, Err(OrderError::Forbidden)));
    }

    #[tokio::test]
    async fn test_tampered_total_is_rejected_before_provider() {
        let f = fixture(StubProvider::new("stripe", true, PaymentStatus::Pending));
        let order = place_order(&f).await;
        f.store.tamper_total(order.id, dec!(1.00));

        let result = f.service.create_payment("cust-1", command(order.id, "stripe")).await;

        assert!(matches!(result, Err(OrderError::IntegrityMismatch { .. })));
        assert_eq!(f.provider.push_count(), 0);
    }

    #[tokio::test]
    async fn test_paid_order_cannot_be_paid_again() {
        let f = fixture(StubProvider::new("stripe", true, PaymentStatus::Pending));
        let order = place_order(&f).await;
        f.manager.finalize_success(order.id, "pi_1").await.unwrap();

        let result = f.service.create_payment("cust-1", command(order.id, "stripe")).await;
        assert!(matches!(result, Err(OrderError::AlreadyPaid(_))));
    }

    #[tokio::test]
    async fn test_pending_push_is_not_repeated() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Pending));
        let order = place_order(&f).await;

        let first = f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();
        let second = f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();

        assert_eq!(f.provider.push_count(), 1);
        assert_eq!(first.payment_id, second.payment_id);
    }

    #[tokio::test]
    async fn test_failed_push_allows_a_new_one() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Failed));
        let order = place_order(&f).await;

        f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();
        let retry = f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();

        assert_eq!(f.provider.push_count(), 2);
        assert_eq!(retry.payment_id.as_deref(), Some("mpesa_2"));
        let stored = f.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_status, OrderPaymentStatus::Pending);
        assert_eq!(stored.payment_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeded_push_finalizes_instead() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Success));
        let order = place_order(&f).await;

        f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();
        let result = f.service.create_payment("cust-1", command(order.id, "mpesa")).await;

        assert!(matches!(result, Err(OrderError::AlreadyPaid(_))));
        assert_eq!(f.provider.push_count(), 1);
        assert!(f.manager.get_order(order.id).await.unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_concurrent_pushes_reach_provider_once() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Pending).slow(Duration::from_millis(50)));
        let order = place_order(&f).await;

        let (first, second) = tokio::join!(
            f.service.create_payment("cust-1", command(order.id, "mpesa")),
            f.service.create_payment("cust-1", command(order.id, "mpesa"))
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(f.provider.push_count(), 1);
        let with_reference: Vec<_> = [&first, &second].into_iter().filter_map(|r| r.payment_id.clone()).collect();
        assert_eq!(with_reference, vec!["mpesa_1".to_string()]);
        assert!(first.status == PaymentStatus::Pending && second.status == PaymentStatus::Pending);

        let stored = f.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.payment_intent_id.as_deref(), Some("mpesa_1"));
        assert!(stored.payment_claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_failed_push_releases_claim() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Pending));
        let order = place_order(&f).await;

        let mut bad = command(order.id, "mpesa");
        bad.customer.phone = None;
        let response = f.service.create_payment("cust-1", bad).await.unwrap();

        assert_eq!(response.status, PaymentStatus::Failed);
        assert_eq!(f.provider.push_count(), 0);
        assert!(f.manager.get_order(order.id).await.unwrap().payment_claimed_at.is_none());

        let retry = f.service.create_payment("cust-1", command(order.id, "mpesa")).await.unwrap();
        assert_eq!(retry.payment_id.as_deref(), Some("mpesa_1"));
    }

    #[tokio::test]
    async fn test_unrecorded_reference_is_reported_and_claim_released() {
        let f = fixture(StubProvider::new("mpesa", false, PaymentStatus::Pending));
        let other = place_order(&f).await;
        f.manager.attach_payment_intent(other.id, "mpesa", "mpesa_1", false).await.unwrap();
        let order = place_order(&f).await;

        let result = f.service.create_payment("cust-1", command(order.id, "mpesa")).await;

        assert!(matches!(
            result,
            Err(OrderError::Store(crate::repository::StoreError::DuplicatePaymentReference(r))) if r == "mpesa_1"
        ));
        assert_eq!(f.provider.push_count(), 1);
        let stored = f.manager.get_order(order.id).await.unwrap();
        assert!(stored.payment_intent_id.is_none());
        assert!(stored.payment_claimed_at.is_none());
    }
}

use bazaar_catalog::PricingPolicy;
use bazaar_core::PaymentProviderRegistry;
use bazaar_order::telemetry::{EventPublisher, PaymentTelemetry};
use bazaar_order::{CheckoutService, OrderManager, OrderStore, PaymentOrchestrator, PaymentReconciler};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::PrometheusMetrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub metrics: Arc<PrometheusMetrics>,
    pub auth: AuthConfig,
}

impl AppState {
    /// Wire the payment core over a store, a provider registry and an event sink
    pub fn build(
        store: Arc<dyn OrderStore>,
        registry: PaymentProviderRegistry,
        policy: PricingPolicy,
        provider_timeout: Duration,
        publisher: Arc<dyn EventPublisher>,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(PrometheusMetrics::new()?);
        let telemetry = PaymentTelemetry::new(publisher, metrics.clone());

        let orders = Arc::new(OrderManager::new(store, policy, telemetry.clone()));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            Arc::new(registry),
            provider_timeout,
            telemetry.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(orders.clone(), orchestrator.clone()));
        let reconciler = Arc::new(PaymentReconciler::new(orders.clone(), orchestrator.clone(), telemetry));

        Ok(Self {
            orders,
            checkout,
            reconciler,
            orchestrator,
            metrics,
            auth,
        })
    }
}

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::payment::{PaymentError, PaymentProvider};
use crate::providers::{MpesaProvider, PaymentsConfig, StripeProvider};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
}

/// Providers usable by this process, built once at startup and injected where needed.
#[derive(Default, Clone)]
pub struct PaymentProviderRegistry {
    providers: Vec<Arc<dyn PaymentProvider>>,
}

impl PaymentProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every known provider and keeps the configured ones
    pub fn from_config(config: &PaymentsConfig) -> Result<Self, PaymentError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let mut registry = Self::new();
        registry.register(Arc::new(StripeProvider::new(config.stripe.clone(), timeout)?));
        registry.register(Arc::new(MpesaProvider::new(config.mpesa.clone(), timeout)?));
        Ok(registry)
    }

    /// Adds a provider unless it reports itself unavailable
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) -> &mut Self {
        if !provider.is_available() {
            warn!(provider = provider.id(), "Payment provider not configured, skipping");
            return self;
        }
        info!(provider = provider.id(), "Payment provider registered");
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Providers a client may choose from
    pub fn available(&self) -> Vec<ProviderSummary> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| ProviderSummary {
                id: p.id().to_string(),
                name: p.display_name().to_string(),
            })
            .collect()
    }

    /// `None` for unknown or currently unavailable providers
    pub fn get(&self, id: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.providers
            .iter()
            .find(|p| p.id() == id && p.is_available())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{PaymentIntentRequest, PaymentResponse, PaymentVerifyResponse};
    use async_trait::async_trait;

    struct FixedProvider {
        id: &'static str,
        available: bool,
    }

    #[async_trait]
    impl PaymentProvider for FixedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn display_name(&self) -> &'static str {
            "Fixed"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn create_payment_intent(
            &self,
            _request: &PaymentIntentRequest,
        ) -> Result<PaymentResponse, PaymentError> {
            Ok(PaymentResponse::pending("fixed_1", "ok"))
        }

        async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
            Ok(PaymentVerifyResponse::new(payment_id, crate::PaymentStatus::Pending, "ok"))
        }
    }

    #[test]
    fn test_unavailable_providers_are_excluded() {
        let registry = PaymentProviderRegistry::new()
            .with(Arc::new(FixedProvider { id: "stripe", available: true }))
            .with(Arc::new(FixedProvider { id: "mpesa", available: false }));

        assert!(registry.get("stripe").is_some());
        assert!(registry.get("mpesa").is_none());
        assert!(registry.get("paypal").is_none());
        assert_eq!(
            registry.available(),
            vec![ProviderSummary { id: "stripe".to_string(), name: "Fixed".to_string() }]
        );
    }

    #[test]
    fn test_from_empty_config_has_no_providers() {
        let registry = PaymentProviderRegistry::from_config(&PaymentsConfig::default()).unwrap();
        assert!(registry.available().is_empty());
    }
}

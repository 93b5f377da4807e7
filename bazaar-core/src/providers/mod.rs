pub mod mpesa;
pub mod stripe;

pub use mpesa::{MpesaConfig, MpesaProvider};
pub use stripe::{StripeConfig, StripeProvider};

use serde::Deserialize;
use std::time::Duration;

use crate::payment::PaymentError;

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    /// Upper bound for any single provider HTTP call
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub mpesa: MpesaConfig,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            stripe: StripeConfig::default(),
            mpesa: MpesaConfig::default(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    15
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, PaymentError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentError::Configuration(format!("http client: {}", e)))
}

pub(crate) fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

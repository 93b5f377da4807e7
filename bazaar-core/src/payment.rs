use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a payment attempt as reported by a provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

/// Order context forwarded to a provider with a payment attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    pub order_id: Option<Uuid>,
    pub order_number: Option<String>,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
}

/// Contact details of the paying customer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub metadata: PaymentMetadata,
    pub return_url: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub status: PaymentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
}

impl PaymentResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: PaymentStatus::Failed,
            message: message.into(),
            payment_id: None,
            client_secret: None,
            redirect_url: None,
            provider_reference: None,
        }
    }

    pub fn pending(payment_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::in_progress(Some(payment_id.into()), message)
    }

    /// Pending result whose reference may not be known yet
    pub fn in_progress(payment_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            status: PaymentStatus::Pending,
            message: message.into(),
            payment_id,
            client_secret: None,
            redirect_url: None,
            provider_reference: None,
        }
    }
}

/// Result of asking a provider about an existing payment, or of parsing its callback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerifyResponse {
    pub success: bool,
    pub status: PaymentStatus,
    pub payment_id: String,
    pub message: String,
    pub amount: Option<Decimal>,
    /// Provider receipt (e.g. an M-Pesa receipt number)
    pub provider_reference: Option<String>,
    pub phone: Option<String>,
}

impl PaymentVerifyResponse {
    pub fn new(payment_id: impl Into<String>, status: PaymentStatus, message: impl Into<String>) -> Self {
        Self {
            success: status == PaymentStatus::Success,
            status,
            payment_id: payment_id.into(),
            message: message.into(),
            amount: None,
            provider_reference: None,
            phone: None,
        }
    }
}

/// Uniform port over heterogeneous payment networks.
///
/// Each adapter owns the translation from its wire format to these types; nothing
/// provider-specific should leak past this trait.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Stable identifier stored in `orders.payment_method`
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// False when credentials are missing; such providers are left out of the registry
    fn is_available(&self) -> bool;

    /// True when the provider deduplicates intents by `request.idempotency_key`
    fn supports_idempotency_key(&self) -> bool {
        false
    }

    /// Amount the customer is actually asked to pay for an order total
    fn charge_amount(&self, amount: Decimal) -> Decimal {
        amount
    }

    /// Start a payment attempt for `request.amount`
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentResponse, PaymentError>;

    /// Fetch the current state of a payment attempt
    async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError>;

    /// Authenticate and parse an inbound provider notification
    async fn handle_callback(
        &self,
        _payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<PaymentVerifyResponse, PaymentError> {
        Err(PaymentError::CallbackUnsupported(self.id().to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),

    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider call timed out")]
    Timeout,

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("{0} does not accept callbacks")]
    CallbackUnsupported(String),

    #[error("provider misconfigured: {0}")]
    Configuration(String),
}

impl PaymentError {
    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        PaymentError::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Whether the provider may still complete the payment
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Timeout => true,
            PaymentError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_response_shape() {
        let response = PaymentResponse::failed("mpesa is not available");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["message"], "mpesa is not available");
        assert!(json.get("paymentId").is_none());
    }

    #[test]
    fn test_verify_success_flag_follows_status() {
        assert!(PaymentVerifyResponse::new("pi_1", PaymentStatus::Success, "ok").success);
        assert!(!PaymentVerifyResponse::new("pi_1", PaymentStatus::Pending, "wait").success);
    }
}

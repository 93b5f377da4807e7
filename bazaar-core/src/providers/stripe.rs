use async_trait::async_trait;
use bazaar_catalog::to_minor_units;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

use super::{http_client, non_empty};
use crate::payment::{
    PaymentError, PaymentIntentRequest, PaymentProvider, PaymentResponse, PaymentStatus,
    PaymentVerifyResponse,
};

type HmacSha256 = Hmac<Sha256>;

const PROVIDER_ID: &str = "stripe";

#[derive(Debug, Deserialize, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Maximum age of a signed webhook timestamp
    #[serde(default = "default_tolerance")]
    pub webhook_tolerance_seconds: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            api_base: default_api_base(),
            webhook_tolerance_seconds: default_tolerance(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_tolerance() -> u64 {
    300
}

/// Card payments through hosted payment intents.
///
/// The client completes authentication with the returned client secret; the final
/// outcome arrives as a signed webhook or via `verify_payment`.
pub struct StripeProvider {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    status: String,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    last_payment_error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: IntentObject,
}

impl StripeProvider {
    pub fn new(config: StripeConfig, timeout: Duration) -> Result<Self, PaymentError> {
        Ok(Self {
            config,
            client: http_client(timeout)?,
        })
    }

    fn secret_key(&self) -> Result<&str, PaymentError> {
        self.config
            .secret_key
            .as_deref()
            .ok_or_else(|| PaymentError::Configuration("stripe secret key missing".to_string()))
    }

    async fn read_error(response: reqwest::Response) -> PaymentError {
        let status = response.status();
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        };
        PaymentError::provider(PROVIDER_ID, message)
    }

    fn intent_status(intent: &IntentObject) -> PaymentStatus {
        match intent.status.as_str() {
            "succeeded" => PaymentStatus::Success,
            "canceled" => PaymentStatus::Failed,
            "requires_payment_method" if intent.last_payment_error.is_some() => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    fn to_verify_response(intent: IntentObject, status: PaymentStatus) -> PaymentVerifyResponse {
        let message = match status {
            PaymentStatus::Success => "Payment succeeded".to_string(),
            PaymentStatus::Failed => intent
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| format!("Payment {}", intent.status)),
            PaymentStatus::Pending => format!("Payment is {}", intent.status),
        };

        let mut response = PaymentVerifyResponse::new(intent.id.clone(), status, message);
        response.amount = intent.amount.map(|minor| Decimal::new(minor, 2));
        response.provider_reference = Some(intent.id);
        response
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "Card (Stripe)"
    }

    fn is_available(&self) -> bool {
        non_empty(&self.config.secret_key)
    }

    fn supports_idempotency_key(&self) -> bool {
        true
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        let minor_units = to_minor_units(request.amount)
            .filter(|v| *v > 0)
            .ok_or_else(|| PaymentError::Validation(format!("invalid amount {}", request.amount)))?;

        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), minor_units.to_string()),
            ("currency".into(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        let metadata = &request.metadata;
        if let Some(order_id) = metadata.order_id {
            form.push(("metadata[order_id]".into(), order_id.to_string()));
        }
        if let Some(number) = &metadata.order_number {
            form.push(("metadata[order_number]".into(), number.clone()));
        }
        if let Some(customer_id) = &metadata.customer_id {
            form.push(("metadata[customer_id]".into(), customer_id.clone()));
        }
        if let Some(email) = &metadata.email {
            form.push(("receipt_email".into(), email.clone()));
        }

        let mut http = self
            .client
            .post(format!("{}/v1/payment_intents", self.config.api_base))
            .bearer_auth(self.secret_key()?)
            .form(&form);
        if let Some(key) = &request.idempotency_key {
            http = http.header("Idempotency-Key", key);
        }

        let response = http.send().await?;
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let intent: IntentObject = response.json().await?;
        info!(provider = PROVIDER_ID, payment_id = %intent.id, "Payment intent created");

        let status = Self::intent_status(&intent);
        Ok(PaymentResponse {
            success: status != PaymentStatus::Failed,
            status,
            message: "Payment intent created".to_string(),
            payment_id: Some(intent.id.clone()),
            client_secret: intent.client_secret,
            redirect_url: request.return_url.clone(),
            provider_reference: Some(intent.id),
        })
    }

    async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.config.api_base, payment_id))
            .bearer_auth(self.secret_key()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let intent: IntentObject = response.json().await?;
        let status = Self::intent_status(&intent);
        Ok(Self::to_verify_response(intent, status))
    }

    async fn handle_callback(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<PaymentVerifyResponse, PaymentError> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::InvalidSignature)?;
        let signature = signature.ok_or(PaymentError::InvalidSignature)?;

        let now = chrono::Utc::now().timestamp();
        if !verify_signature(payload, signature, secret, self.config.webhook_tolerance_seconds, now) {
            warn!(provider = PROVIDER_ID, "Webhook signature verification failed");
            return Err(PaymentError::InvalidSignature);
        }

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        info!(provider = PROVIDER_ID, event_id = %event.id, event_type = %event.type_, "Webhook received");

        let status = match event.type_.as_str() {
            "payment_intent.succeeded" => PaymentStatus::Success,
            "payment_intent.payment_failed" | "payment_intent.canceled" => PaymentStatus::Failed,
            // Anything else is informational and leaves the order untouched
            _ => PaymentStatus::Pending,
        };
        Ok(Self::to_verify_response(event.data.object, status))
    }
}

/// Checks a `t=<unix>,v1=<hex>` signature header over `"{t}.{body}"`.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, tolerance_secs: u64, now: i64) -> bool {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    let Ok(signed_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - signed_at).unsigned_abs() > tolerance_secs {
        return false;
    }

    let expected = compute_signature(payload, timestamp, secret);
    candidates
        .iter()
        .any(|candidate| constant_time_eq(expected.as_bytes(), candidate.as_bytes()))
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`
pub fn compute_signature(payload: &[u8], timestamp: &str, secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

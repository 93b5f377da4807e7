use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use bazaar_shared::Masked;

use super::{http_client, non_empty};
use crate::payment::{
    PaymentError, PaymentIntentRequest, PaymentProvider, PaymentResponse, PaymentStatus,
    PaymentVerifyResponse,
};

const PROVIDER_ID: &str = "mpesa";

/// Subscriber numbers are 254 followed by nine digits
const PHONE_PATTERN: &str = r"^254\d{9}$";

/// Daraja reports an in-flight STK query with this error code
const STILL_PROCESSING: &str = "500.001.1001";

/// Safaricom timestamps are East Africa Time
const EAT_OFFSET_HOURS: i64 = 3;

#[derive(Debug, Deserialize, Clone)]
pub struct MpesaConfig {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub shortcode: Option<String>,
    pub passkey: Option<String>,
    pub callback_url: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: String,
    #[serde(default = "default_account_reference")]
    pub account_reference: String,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            consumer_key: None,
            consumer_secret: None,
            shortcode: None,
            passkey: None,
            callback_url: None,
            api_base: default_api_base(),
            transaction_type: default_transaction_type(),
            account_reference: default_account_reference(),
        }
    }
}

fn default_api_base() -> String {
    "https://sandbox.safaricom.co.ke".to_string()
}

fn default_transaction_type() -> String {
    "CustomerPayBillOnline".to_string()
}

fn default_account_reference() -> String {
    "Bazaar".to_string()
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Mobile-money payments through an STK push.
///
/// The push only prompts the subscriber's handset; the outcome arrives later via the
/// callback URL or by polling `verify_payment`.
pub struct MpesaProvider {
    config: MpesaConfig,
    client: reqwest::Client,
    phone_pattern: Regex,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: String,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    result_code: Option<Value>,
    result_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DarajaError {
    error_code: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    result_code: Value,
    #[serde(default)]
    result_desc: Option<String>,
    #[serde(default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallbackMetadata {
    #[serde(default)]
    item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallbackItem {
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

impl CallbackMetadata {
    fn get(&self, name: &str) -> Option<&Value> {
        self.item
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }
}

impl MpesaProvider {
    pub fn new(config: MpesaConfig, timeout: Duration) -> Result<Self, PaymentError> {
        let phone_pattern = Regex::new(PHONE_PATTERN)
            .map_err(|e| PaymentError::Configuration(e.to_string()))?;
        Ok(Self {
            config,
            client: http_client(timeout)?,
            phone_pattern,
            token: RwLock::new(None),
        })
    }

    /// Normalise a subscriber number to `254XXXXXXXXX` and validate it
    pub fn normalize_phone(&self, raw: &str) -> Result<String, PaymentError> {
        let digits: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '+' && *c != '-')
            .collect();

        let normalized = match digits.strip_prefix('0') {
            Some(local) if local.len() == 9 => format!("254{}", local),
            _ => digits,
        };

        if self.phone_pattern.is_match(&normalized) {
            Ok(normalized)
        } else {
            Err(PaymentError::Validation(
                "Invalid phone number. Use the format 2547XXXXXXXX".to_string(),
            ))
        }
    }

    fn credential(&self, value: &Option<String>, name: &str) -> Result<String, PaymentError> {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::Configuration(format!("mpesa {} missing", name)))
    }

    /// STK password and its timestamp. Safaricom rejects stale timestamps, so this is
    /// rebuilt for every request.
    fn password(&self) -> Result<(String, String), PaymentError> {
        let shortcode = self.credential(&self.config.shortcode, "shortcode")?;
        let passkey = self.credential(&self.config.passkey, "passkey")?;
        let timestamp = (chrono::Utc::now() + chrono::Duration::hours(EAT_OFFSET_HOURS))
            .format("%Y%m%d%H%M%S")
            .to_string();
        Ok((stk_password(&shortcode, &passkey, &timestamp), timestamp))
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let key = self.credential(&self.config.consumer_key, "consumer key")?;
        let secret = self.credential(&self.config.consumer_secret, "consumer secret")?;

        let response = self
            .client
            .get(format!("{}/oauth/v1/generate", self.config.api_base))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(key, Some(secret))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::provider(
                PROVIDER_ID,
                format!("token request returned HTTP {}", response.status()),
            ));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = body
            .expires_in
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(3599);
        // Refresh a minute early so an in-flight request never carries an expired token
        let ttl = Duration::from_secs(lifetime.saturating_sub(60));

        let mut slot = self.token.write().await;
        *slot = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(body.access_token)
    }

    fn account_reference(&self, order_number: Option<&str>) -> String {
        // Daraja caps the account reference at 12 characters
        order_number
            .unwrap_or(&self.config.account_reference)
            .chars()
            .take(12)
            .collect()
    }
}

/// base64(shortcode + passkey + timestamp)
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

fn result_code(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[async_trait]
impl PaymentProvider for MpesaProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn display_name(&self) -> &'static str {
        "M-Pesa"
    }

    fn is_available(&self) -> bool {
        non_empty(&self.config.consumer_key)
            && non_empty(&self.config.consumer_secret)
            && non_empty(&self.config.shortcode)
            && non_empty(&self.config.passkey)
            && non_empty(&self.config.callback_url)
    }

    // M-Pesa only settles whole shillings
    fn charge_amount(&self, amount: Decimal) -> Decimal {
        amount.ceil()
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentResponse, PaymentError> {
        let raw_phone = request
            .metadata
            .phone
            .as_deref()
            .ok_or_else(|| PaymentError::Validation("Phone number is required for M-Pesa".to_string()))?;
        let phone = self.normalize_phone(raw_phone)?;

        let charged = self.charge_amount(request.amount);
        let amount = charged
            .to_i64()
            .filter(|v| *v > 0)
            .ok_or_else(|| PaymentError::Validation(format!("invalid amount {}", request.amount)))?;
        if charged != request.amount {
            warn!(
                provider = PROVIDER_ID,
                order_id = ?request.metadata.order_id,
                requested = %request.amount,
                charged = %charged,
                "Amount rounded up to whole shillings"
            );
        }

        let shortcode = self.credential(&self.config.shortcode, "shortcode")?;
        let callback_url = self.credential(&self.config.callback_url, "callback url")?;
        let token = self.access_token().await?;
        let (password, timestamp) = self.password()?;

        let body = StkPushRequest {
            business_short_code: &shortcode,
            password,
            timestamp,
            transaction_type: &self.config.transaction_type,
            amount,
            party_a: &phone,
            party_b: &shortcode,
            phone_number: &phone,
            callback_url: &callback_url,
            account_reference: self.account_reference(request.metadata.order_number.as_deref()),
            transaction_desc: "Order payment",
        };

        info!(provider = PROVIDER_ID, phone = %Masked(phone.as_str()), amount, "Sending STK push");

        let response = self
            .client
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.config.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<DarajaError>().await {
                Ok(err) => err.error_message.unwrap_or_else(|| format!("HTTP {}", status)),
                Err(_) => format!("HTTP {}", status),
            };
            return Err(PaymentError::provider(PROVIDER_ID, message));
        }

        let push: StkPushResponse = response.json().await?;
        match (push.response_code.as_deref(), push.checkout_request_id) {
            (Some("0"), Some(checkout_id)) => {
                let message = push
                    .customer_message
                    .unwrap_or_else(|| "Check your phone to complete the payment".to_string());
                let mut response = PaymentResponse::pending(checkout_id.clone(), message);
                response.provider_reference = Some(checkout_id);
                Ok(response)
            }
            _ => Ok(PaymentResponse::failed(
                push.response_description
                    .unwrap_or_else(|| "M-Pesa rejected the payment request".to_string()),
            )),
        }
    }

    async fn verify_payment(&self, payment_id: &str) -> Result<PaymentVerifyResponse, PaymentError> {
        let shortcode = self.credential(&self.config.shortcode, "shortcode")?;
        let token = self.access_token().await?;
        let (password, timestamp) = self.password()?;

        let response = self
            .client
            .post(format!("{}/mpesa/stkpushquery/v1/query", self.config.api_base))
            .bearer_auth(token)
            .json(&StkQueryRequest {
                business_short_code: &shortcode,
                password,
                timestamp,
                checkout_request_id: payment_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err = response.json::<DarajaError>().await.ok();
            if err.as_ref().and_then(|e| e.error_code.as_deref()) == Some(STILL_PROCESSING) {
                return Ok(PaymentVerifyResponse::new(
                    payment_id,
                    PaymentStatus::Pending,
                    "The transaction is being processed",
                ));
            }
            let message = err
                .and_then(|e| e.error_message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(PaymentError::provider(PROVIDER_ID, message));
        }

        let query: StkQueryResponse = response.json().await?;
        let desc = query.result_desc.unwrap_or_default();
        let status = match query.result_code.as_ref().and_then(result_code) {
            Some(0) => PaymentStatus::Success,
            Some(4999) | None => PaymentStatus::Pending,
            Some(_) => PaymentStatus::Failed,
        };
        Ok(PaymentVerifyResponse::new(payment_id, status, desc))
    }

    async fn handle_callback(
        &self,
        payload: &[u8],
        _signature: Option<&str>,
    ) -> Result<PaymentVerifyResponse, PaymentError> {
        let envelope: CallbackEnvelope = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
        let callback = envelope.body.stk_callback;

        let code = result_code(&callback.result_code).ok_or_else(|| {
            PaymentError::MalformedPayload(format!("unreadable ResultCode {}", callback.result_code))
        })?;
        let desc = callback.result_desc.unwrap_or_default();

        if code != 0 {
            warn!(
                provider = PROVIDER_ID,
                payment_id = %callback.checkout_request_id,
                result_code = code,
                "STK push did not complete: {}",
                desc
            );
            return Ok(PaymentVerifyResponse::new(
                callback.checkout_request_id,
                PaymentStatus::Failed,
                desc,
            ));
        }

        let mut response =
            PaymentVerifyResponse::new(callback.checkout_request_id, PaymentStatus::Success, desc);
        if let Some(metadata) = &callback.callback_metadata {
            response.amount = metadata.get("Amount").and_then(|v| match v {
                Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
                Value::String(s) => s.parse::<Decimal>().ok(),
                _ => None,
            });
            response.provider_reference = metadata
                .get("MpesaReceiptNumber")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            response.phone = metadata.get("PhoneNumber").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentMetadata;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: &str) -> MpesaConfig {
        MpesaConfig {
            consumer_key: Some("key".to_string()),
            consumer_secret: Some("secret".to_string()),
            shortcode: Some("174379".to_string()),
            passkey: Some("passkey".to_string()),
            callback_url: Some("https://example.com/callback".to_string()),
            api_base: api_base.to_string(),
            ..Default::default()
        }
    }

    fn request(phone: Option<&str>) -> PaymentIntentRequest {
        PaymentIntentRequest {
            amount: dec!(28.05),
            currency: "KES".to_string(),
            metadata: PaymentMetadata {
                order_id: Some(Uuid::new_v4()),
                order_number: Some("ORD-LX3K2-9QZT".to_string()),
                phone: phone.map(str::to_string),
                ..Default::default()
            },
            return_url: None,
            idempotency_key: None,
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok_abc", "expires_in": "3599"
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_charge_amount_rounds_up_to_whole_shillings() {
        let mpesa = MpesaProvider::new(config("http://unused"), Duration::from_secs(1)).unwrap();
        assert_eq!(mpesa.charge_amount(dec!(28.05)), dec!(29));
        assert_eq!(mpesa.charge_amount(dec!(30)), dec!(30));
    }

    #[test]
    fn test_phone_normalization() {
        let mpesa = MpesaProvider::new(config("http://unused"), Duration::from_secs(1)).unwrap();

        assert_eq!(mpesa.normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(mpesa.normalize_phone("+254 712 345 678").unwrap(), "254712345678");
        assert_eq!(mpesa.normalize_phone("0712345678").unwrap(), "254712345678");
        assert!(mpesa.normalize_phone("123").is_err());
        assert!(mpesa.normalize_phone("254712").is_err());
        assert!(mpesa.normalize_phone("25471234567a").is_err());
    }

    #[test]
    fn test_stk_password_is_deterministic() {
        let a = stk_password("174379", "passkey", "20240101120000");
        let b = stk_password("174379", "passkey", "20240101120000");
        assert_eq!(a, b);
        assert_eq!(
            STANDARD.decode(&a).unwrap(),
            b"174379passkey20240101120000".to_vec()
        );
    }

    #[test]
    fn test_availability_requires_all_credentials() {
        let mut partial = config("http://unused");
        partial.passkey = None;
        let mpesa = MpesaProvider::new(partial, Duration::from_secs(1)).unwrap();
        assert!(!mpesa.is_available());
    }

    #[tokio::test]
    async fn test_invalid_phone_rejected_before_network() {
        let server = MockServer::start().await;
        // No request of any kind may reach the provider
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mpesa = MpesaProvider::new(config(&server.uri()), Duration::from_secs(1)).unwrap();

        for phone in ["123", "254712"] {
            let err = mpesa.create_payment_intent(&request(Some(phone))).await.unwrap_err();
            assert!(matches!(err, PaymentError::Validation(_)));
        }
        let err = mpesa.create_payment_intent(&request(None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stk_push_returns_checkout_request_id() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpush/v1/processrequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mpesa = MpesaProvider::new(config(&server.uri()), Duration::from_secs(5)).unwrap();
        let response = mpesa
            .create_payment_intent(&request(Some("0712345678")))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.status, PaymentStatus::Pending);
        assert_eq!(response.payment_id.as_deref(), Some("ws_CO_191220191020363925"));
    }

    #[tokio::test]
    async fn test_query_still_processing_is_pending() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "requestId": "1",
                "errorCode": "500.001.1001",
                "errorMessage": "The transaction is being processed"
            })))
            .mount(&server)
            .await;

        let mpesa = MpesaProvider::new(config(&server.uri()), Duration::from_secs(5)).unwrap();
        let result = mpesa.verify_payment("ws_CO_1").await.unwrap();
        assert_eq!(result.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_query_cancelled_by_user_is_failed() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ResponseCode": "0",
                "ResultCode": "1032",
                "ResultDesc": "Request cancelled by user"
            })))
            .mount(&server)
            .await;

        let mpesa = MpesaProvider::new(config(&server.uri()), Duration::from_secs(5)).unwrap();
        let result = mpesa.verify_payment("ws_CO_1").await.unwrap();
        assert_eq!(result.status, PaymentStatus::Failed);
        assert_eq!(result.message, "Request cancelled by user");
    }

    #[tokio::test]
    async fn test_callback_success_extracts_metadata() {
        let mpesa = MpesaProvider::new(config("http://unused"), Duration::from_secs(1)).unwrap();
        let payload = serde_json::to_vec(&serde_json::json!({
            "Body": { "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": { "Item": [
                    { "Name": "Amount", "Value": 29 },
                    { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                    { "Name": "Balance" },
                    { "Name": "TransactionDate", "Value": 20191219102115u64 },
                    { "Name": "PhoneNumber", "Value": 254712345678u64 }
                ] }
            } }
        }))
        .unwrap();

        let parsed = mpesa.handle_callback(&payload, None).await.unwrap();
        assert_eq!(parsed.status, PaymentStatus::Success);
        assert_eq!(parsed.payment_id, "ws_CO_191220191020363925");
        assert_eq!(parsed.amount, Some(dec!(29)));
        assert_eq!(parsed.provider_reference.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(parsed.phone.as_deref(), Some("254712345678"));
    }

    #[tokio::test]
    async fn test_callback_failure_and_malformed() {
        let mpesa = MpesaProvider::new(config("http://unused"), Duration::from_secs(1)).unwrap();
        let payload = serde_json::to_vec(&serde_json::json!({
            "Body": { "stkCallback": {
                "CheckoutRequestID": "ws_CO_2",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            } }
        }))
        .unwrap();

        let parsed = mpesa.handle_callback(&payload, None).await.unwrap();
        assert_eq!(parsed.status, PaymentStatus::Failed);

        let malformed = mpesa.handle_callback(b"{\"Body\":{}}", None).await;
        assert!(matches!(malformed, Err(PaymentError::MalformedPayload(_))));
    }
}

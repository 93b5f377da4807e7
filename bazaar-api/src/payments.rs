use axum::{extract::State, http::StatusCode, Extension, Json};
use bazaar_core::{CustomerInfo, PaymentResponse, PaymentStatus, ProviderSummary};
use bazaar_order::CreatePayment;
use bazaar_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CustomerClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub payment_method: String,
    pub return_url: Option<String>,
    /// Overrides the key derived from the order and attempt number
    pub idempotency_key: Option<String>,
    /// Subscriber number for push-based providers
    pub phone: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub status: PaymentStatus,
    pub message: String,
}

impl From<PaymentResponse> for CreatePaymentResponse {
    fn from(response: PaymentResponse) -> Self {
        Self {
            success: response.success,
            payment_id: response.payment_id,
            client_secret: response.client_secret,
            redirect_url: response.redirect_url,
            status: response.status,
            message: response.message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub payment_id: String,
    pub payment_method: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    pub payment_status: String,
}

/// POST /v1/payments/create
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    tracing::info!(
        order_id = %req.order_id,
        method = %req.payment_method,
        phone = ?req.phone.as_deref().map(Masked),
        "Payment requested"
    );

    let command = CreatePayment {
        order_id: req.order_id,
        payment_method: req.payment_method,
        return_url: req.return_url,
        idempotency_key: req.idempotency_key,
        customer: CustomerInfo {
            email: claims.email.clone(),
            phone: req.phone,
            name: req.name,
        },
    };

    let response = state.checkout.create_payment(&claims.sub, command).await?;

    // Validation and provider failures come back typed, never as a crash
    let status = if response.status == PaymentStatus::Failed {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response.into())))
}

/// POST /v1/payments/verify
/// Polling fallback while an asynchronous provider has not called back yet
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let verified = state
        .reconciler
        .verify_payment(&claims.sub, &req.payment_id, &req.payment_method)
        .await?;

    Ok(Json(VerifyPaymentResponse {
        success: verified.verification.success,
        status: verified.verification.status,
        order_id: Some(verified.order.id),
        order_number: Some(verified.order.order_number),
        payment_status: verified.order.payment_status.as_str().to_string(),
    }))
}

/// GET /v1/payments/methods
pub async fn list_methods(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    Json(state.orchestrator.available_methods())
}

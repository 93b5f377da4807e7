use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use bazaar_order::CallbackOutcome;
use serde_json::{json, Value};

use crate::state::AppState;

const CARD_PROVIDER: &str = "stripe";
const MOBILE_MONEY_PROVIDER: &str = "mpesa";

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("signature")
        .or_else(|| headers.get("stripe-signature"))
        .and_then(|value| value.to_str().ok())
}

fn log_outcome(provider: &str, outcome: &CallbackOutcome) {
    match outcome {
        CallbackOutcome::Finalized(result) => tracing::info!(
            provider,
            order_id = %result.order().id,
            applied = result.was_applied(),
            "Callback reconciled"
        ),
        CallbackOutcome::StillPending => tracing::debug!(provider, "Callback reports payment still pending"),
        CallbackOutcome::NoMatchingOrder => tracing::info!(provider, "Callback for unknown payment ignored"),
        CallbackOutcome::Absorbed(reason) => tracing::warn!(provider, "Callback acknowledged but not applied: {}", reason),
        CallbackOutcome::Rejected => tracing::warn!(provider, "Callback rejected"),
    }
}

/// POST /v1/webhooks/stripe
/// Signed card webhook. Only an unauthentic request gets a non-200 answer.
pub async fn handle_card_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let outcome = state
        .reconciler
        .reconcile_callback(CARD_PROVIDER, &body, signature_header(&headers))
        .await;
    log_outcome(CARD_PROVIDER, &outcome);

    if outcome.is_rejected() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid signature" })));
    }
    (StatusCode::OK, Json(json!({ "received": true })))
}

/// POST /v1/webhooks/mpesa
/// STK push callback. Always acknowledged so the provider does not redeliver.
pub async fn handle_mobile_money_callback(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let outcome = state
        .reconciler
        .reconcile_callback(MOBILE_MONEY_PROVIDER, &body, None)
        .await;
    log_outcome(MOBILE_MONEY_PROVIDER, &outcome);

    (StatusCode::OK, Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })))
}

use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod metrics;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod state;
pub mod webhooks;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Routes that need a resolved customer
    let customer = Router::new()
        .route("/v1/checkout", post(orders::checkout))
        .route("/v1/orders/{id}", get(orders::get_order))
        .route("/v1/payments/create", post(payments::create_payment))
        .route("/v1/payments/verify", post(payments::verify_payment))
        .route_layer(from_fn_with_state(state.clone(), middleware::customer_auth_middleware));

    // Provider-facing and operational routes
    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/v1/payments/methods", get(payments::list_methods))
        .route("/v1/webhooks/stripe", post(webhooks::handle_card_webhook))
        .route("/v1/webhooks/mpesa", post(webhooks::handle_mobile_money_callback));

    Router::new()
        .merge(customer)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

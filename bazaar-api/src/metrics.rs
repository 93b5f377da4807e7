use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse};
use bazaar_core::PaymentStatus;
use bazaar_order::telemetry::PaymentMetrics;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::state::AppState;

/// Payment counters on a process-owned registry
pub struct PrometheusMetrics {
    registry: Registry,
    payment_attempts: IntCounterVec,
    reconciliation_failures: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let payment_attempts = IntCounterVec::new(
            Opts::new("bazaar_payment_attempts_total", "Payment intents requested, by outcome"),
            &["provider", "status"],
        )?;
        let reconciliation_failures = IntCounterVec::new(
            Opts::new(
                "bazaar_reconciliation_failures_total",
                "Provider callbacks acknowledged but not applied",
            ),
            &["provider"],
        )?;

        registry.register(Box::new(payment_attempts.clone()))?;
        registry.register(Box::new(reconciliation_failures.clone()))?;

        Ok(Self {
            registry,
            payment_attempts,
            reconciliation_failures,
        })
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, anyhow::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl PaymentMetrics for PrometheusMetrics {
    fn payment_attempt(&self, provider: &str, status: PaymentStatus) {
        self.payment_attempts
            .with_label_values(&[provider, status.as_str()])
            .inc();
    }

    fn reconciliation_failure(&self, provider: &str) {
        self.reconciliation_failures.with_label_values(&[provider]).inc();
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.payment_attempt("mpesa", PaymentStatus::Pending);
        metrics.payment_attempt("mpesa", PaymentStatus::Pending);
        metrics.reconciliation_failure("stripe");

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"bazaar_payment_attempts_total{provider="mpesa",status="PENDING"} 2"#));
        assert!(text.contains(r#"bazaar_reconciliation_failures_total{provider="stripe"} 1"#));
    }
}

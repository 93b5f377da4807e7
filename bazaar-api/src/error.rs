use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bazaar_order::OrderError;
use serde_json::json;

const CONTACT_SUPPORT: &str = "We could not verify this order's total. Please contact support.";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    #[error("{0}")]
    ConflictError(String),
    #[error("{0}")]
    InternalServerError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::EmptyCart => AppError::ValidationError(err.to_string()),
            OrderError::InvalidRequest(msg) => AppError::ValidationError(msg),
            OrderError::Pricing(e) => AppError::ValidationError(e.to_string()),
            OrderError::NotFound(_) => AppError::NotFoundError("Order not found".to_string()),
            OrderError::Forbidden => AppError::AuthorizationError(err.to_string()),
            OrderError::AlreadyPaid(_)
            | OrderError::CartChanged
            | OrderError::PaymentInProgress(_)
            | OrderError::InvalidTransition(_) => AppError::ConflictError(err.to_string()),
            // Details were already logged by the integrity check
            OrderError::IntegrityMismatch { .. } => AppError::ConflictError(CONTACT_SUPPORT.to_string()),
            OrderError::Store(e) => AppError::Anyhow(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn status_of(err: OrderError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_order_errors_map_to_statuses() {
        assert_eq!(status_of(OrderError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(OrderError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrderError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_of(OrderError::AlreadyPaid("ORD-1".into())), StatusCode::CONFLICT);
        assert_eq!(status_of(OrderError::CartChanged), StatusCode::CONFLICT);
        assert_eq!(status_of(OrderError::PaymentInProgress("ws_CO_1".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(OrderError::IntegrityMismatch { stored: dec!(1), recomputed: dec!(2) }),
            StatusCode::CONFLICT
        );
    }
}

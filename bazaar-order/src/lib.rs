pub mod checkout;
pub mod manager;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod reconciler;
pub mod repository;
pub mod telemetry;

pub use checkout::{CheckoutService, CreatePayment};
pub use manager::{CheckoutDetails, FinalizeOutcome, OrderError, OrderManager, PaymentClaim};
pub use models::{CartItem, InvalidTransition, Order, OrderItem, OrderPaymentStatus, OrderStatus};
pub use orchestrator::{PaymentOrchestrator, PaymentRequest};
pub use reconciler::{CallbackOutcome, PaymentReconciler, VerifiedPayment};
pub use repository::{OrderStore, OrderTransaction, StoreError};
pub use telemetry::{EventPublisher, PaymentMetrics, PaymentTelemetry};

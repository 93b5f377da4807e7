pub mod events;

pub use events::{OrderPaidEvent, PaymentFailedEvent, ReconciliationFailedEvent};

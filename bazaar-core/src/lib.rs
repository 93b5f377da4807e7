pub mod payment;
pub mod providers;
pub mod registry;

pub use payment::{
    CustomerInfo, PaymentError, PaymentIntentRequest, PaymentMetadata, PaymentProvider,
    PaymentResponse, PaymentStatus, PaymentVerifyResponse,
};
pub use registry::{PaymentProviderRegistry, ProviderSummary};

pub type PaymentResult<T> = Result<T, PaymentError>;

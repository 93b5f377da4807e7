pub mod inventory;
pub mod pricing;

pub use inventory::{AlertType, StockLevel};
pub use pricing::{
    AmountBreakdown, AmountCalculator, FeeAdjustments, LineAmount, PricingError, PricingPolicy,
    to_minor_units,
};

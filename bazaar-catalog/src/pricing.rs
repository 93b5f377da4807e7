use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Allowed drift between a stored total and a recomputed one.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// One priced line as seen by the calculator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineAmount {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl LineAmount {
    pub fn new(unit_price: Decimal, quantity: i32) -> Self {
        Self { unit_price, quantity }
    }
}

/// Fees applied on top of the subtotal. Each must be non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeAdjustments {
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountBreakdown {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub currency: String,
}

impl AmountBreakdown {
    /// True when `stored` is within one minor unit of the computed total
    pub fn matches(&self, stored: Decimal) -> bool {
        (self.total - stored).abs() <= TOTAL_TOLERANCE
    }
}

/// Platform pricing rules applied when an order is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Fraction of the subtotal charged as tax (0.10 = 10%)
    pub tax_rate: Decimal,

    /// Flat shipping fee per order
    pub shipping_fee: Decimal,

    pub currency: String,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(10, 2),
            shipping_fee: Decimal::ZERO,
            currency: "KES".to_string(),
        }
    }
}

impl PricingPolicy {
    /// Fees for a given subtotal. Discounts are not issued by the platform yet.
    pub fn fees_for(&self, subtotal: Decimal) -> FeeAdjustments {
        FeeAdjustments {
            tax: round_money(subtotal * self.tax_rate),
            shipping: self.shipping_fee,
            discount: Decimal::ZERO,
        }
    }

    pub fn calculator(&self) -> AmountCalculator {
        AmountCalculator::new(self.currency.clone())
    }
}

/// Pure amount computation used at order creation and again before payment
#[derive(Debug, Clone)]
pub struct AmountCalculator {
    currency: String,
}

impl AmountCalculator {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    pub fn subtotal(&self, items: &[LineAmount]) -> Result<Decimal, PricingError> {
        if items.is_empty() {
            return Err(PricingError::InvalidCart);
        }

        let mut subtotal = Decimal::ZERO;
        for (index, item) in items.iter().enumerate() {
            if item.unit_price.is_sign_negative() {
                return Err(PricingError::InvalidPrice(format!(
                    "line {} has negative unit price {}",
                    index, item.unit_price
                )));
            }
            if item.quantity <= 0 {
                return Err(PricingError::InvalidPrice(format!(
                    "line {} has non-positive quantity {}",
                    index, item.quantity
                )));
            }
            subtotal += item.unit_price * Decimal::from(item.quantity);
        }

        Ok(round_money(subtotal))
    }

    pub fn calculate(
        &self,
        items: &[LineAmount],
        fees: FeeAdjustments,
    ) -> Result<AmountBreakdown, PricingError> {
        let subtotal = self.subtotal(items)?;

        for (name, value) in [
            ("tax", fees.tax),
            ("shipping", fees.shipping),
            ("discount", fees.discount),
        ] {
            if value.is_sign_negative() {
                return Err(PricingError::InvalidPrice(format!(
                    "{} adjustment must not be negative: {}",
                    name, value
                )));
            }
        }

        let total = round_money(subtotal + fees.tax + fees.shipping - fees.discount);
        if total <= Decimal::ZERO {
            return Err(PricingError::NonPositiveTotal(total));
        }

        Ok(AmountBreakdown {
            subtotal,
            tax: fees.tax,
            shipping: fees.shipping,
            discount: fees.discount,
            total,
            currency: self.currency.clone(),
        })
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Integer minor units (cents) for providers that reject fractional amounts
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PricingError {
    #[error("Cart has no items")]
    InvalidCart,

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Order total must be positive, got {0}")]
    NonPositiveTotal(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cart_total_with_tax() {
        let calculator = AmountCalculator::new("KES");
        let items = vec![
            LineAmount::new(dec!(10.00), 2),
            LineAmount::new(dec!(5.50), 1),
        ];
        let fees = FeeAdjustments {
            tax: dec!(2.55),
            ..Default::default()
        };

        let breakdown = calculator.calculate(&items, fees).unwrap();

        assert_eq!(breakdown.subtotal, dec!(25.50));
        assert_eq!(breakdown.total, dec!(28.05));
        assert!(breakdown.matches(dec!(28.05)));
        assert!(breakdown.matches(dec!(28.06)));
        assert!(!breakdown.matches(dec!(28.07)));
    }

    #[test]
    fn test_policy_fees() {
        let policy = PricingPolicy::default();
        let fees = policy.fees_for(dec!(25.50));

        assert_eq!(fees.tax, dec!(2.55));
        assert_eq!(fees.shipping, Decimal::ZERO);
        assert_eq!(fees.discount, Decimal::ZERO);
    }

    #[test]
    fn test_empty_cart_rejected() {
        let calculator = AmountCalculator::new("KES");
        let result = calculator.calculate(&[], FeeAdjustments::default());
        assert_eq!(result, Err(PricingError::InvalidCart));
    }

    #[test]
    fn test_bad_lines_rejected() {
        let calculator = AmountCalculator::new("KES");

        let zero_qty = calculator.calculate(&[LineAmount::new(dec!(3), 0)], FeeAdjustments::default());
        assert!(matches!(zero_qty, Err(PricingError::InvalidPrice(_))));

        let negative = calculator.calculate(&[LineAmount::new(dec!(-3), 1)], FeeAdjustments::default());
        assert!(matches!(negative, Err(PricingError::InvalidPrice(_))));
    }

    #[test]
    fn test_discount_cannot_zero_the_total() {
        let calculator = AmountCalculator::new("KES");
        let fees = FeeAdjustments {
            discount: dec!(20),
            ..Default::default()
        };

        let result = calculator.calculate(&[LineAmount::new(dec!(10), 2)], fees);
        assert_eq!(result, Err(PricingError::NonPositiveTotal(Decimal::ZERO)));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(28.05)), Some(2805));
        assert_eq!(to_minor_units(dec!(0.1)), Some(10));
        assert_eq!(to_minor_units(dec!(10.005)), Some(1001));
        assert_eq!(to_minor_units(dec!(0.125)), Some(13));
    }
}

use bazaar_catalog::PricingPolicy;
use bazaar_core::providers::PaymentsConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub payments: PaymentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub tax_rate: Decimal,
    /// Flat per-order shipping fee; zero unless configured
    #[serde(default)]
    pub shipping_fee: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_low_stock_threshold")]
    pub default_low_stock_threshold: i32,
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_low_stock_threshold() -> i32 {
    5
}

impl BusinessRules {
    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy {
            tax_rate: self.tax_rate,
            shipping_fee: self.shipping_fee,
            currency: self.currency.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `BAZAAR__PAYMENTS__STRIPE__SECRET_KEY=sk_test_...`
            .add_source(config::Environment::with_prefix("BAZAAR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_business_rules_defaults() {
        let rules: BusinessRules = serde_json::from_value(serde_json::json!({ "tax_rate": "0.16" })).unwrap();

        assert_eq!(rules.shipping_fee, Decimal::ZERO);
        assert_eq!(rules.currency, "KES");
        assert_eq!(rules.default_low_stock_threshold, 5);

        let policy = rules.pricing_policy();
        assert_eq!(policy.tax_rate, dec!(0.16));
        assert_eq!(policy.fees_for(dec!(100.00)).tax, dec!(16.00));
    }
}

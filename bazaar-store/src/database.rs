use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay rules stored in the `business_rules` table on top of file config.
    /// Rows look like `{"value": <number or string>}`.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            let Some(value) = row.rule_value.get("value") else {
                continue;
            };
            match row.rule_key.as_str() {
                "tax_rate" => match as_decimal(value) {
                    Some(rate) => rules.tax_rate = rate,
                    None => warn!("Ignoring invalid tax_rate rule: {}", value),
                },
                "shipping_fee" => match as_decimal(value) {
                    Some(fee) => rules.shipping_fee = fee,
                    None => warn!("Ignoring invalid shipping_fee rule: {}", value),
                },
                "default_low_stock_threshold" => {
                    if let Some(threshold) = value.as_i64().and_then(|t| i32::try_from(t).ok()) {
                        rules.default_low_stock_threshold = threshold;
                    }
                }
                _ => {}
            }
        }

        Ok(rules)
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        Value::String(s) => s.parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.filter(|d| !d.is_sign_negative())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rule_values_parse_as_decimals() {
        assert_eq!(as_decimal(&serde_json::json!(0.16)), Some(dec!(0.16)));
        assert_eq!(as_decimal(&serde_json::json!("250")), Some(dec!(250)));
        assert_eq!(as_decimal(&serde_json::json!(-1)), None);
        assert_eq!(as_decimal(&serde_json::json!(true)), None);
    }
}

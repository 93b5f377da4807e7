use uuid::Uuid;
use serde::{Deserialize, Serialize};

/// Kind of stock alert raised after a sale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::OutOfStock => "out_of_stock",
        }
    }
}

/// Product stock after a sale has been applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub product_name: String,
    pub vendor_id: Uuid,
    pub inventory: i32,
    pub sold_count: i32,
    pub low_stock_threshold: i32,
}

impl StockLevel {
    /// Alert to raise for the current level, if any
    pub fn alert(&self) -> Option<AlertType> {
        if self.inventory <= 0 {
            Some(AlertType::OutOfStock)
        } else if self.inventory <= self.low_stock_threshold {
            Some(AlertType::LowStock)
        } else {
            None
        }
    }

    /// Apply a sale of `quantity` units
    pub fn record_sale(&mut self, quantity: i32) {
        self.inventory -= quantity;
        self.sold_count += quantity;
    }

    pub fn alert_message(&self, alert: AlertType) -> String {
        match alert {
            AlertType::OutOfStock => format!("{} is out of stock", self.product_name),
            AlertType::LowStock => format!(
                "{} is running low ({} left, threshold {})",
                self.product_name, self.inventory, self.low_stock_threshold
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(inventory: i32, threshold: i32) -> StockLevel {
        StockLevel {
            product_id: Uuid::new_v4(),
            product_name: "Kikoy Towel".to_string(),
            vendor_id: Uuid::new_v4(),
            inventory,
            sold_count: 0,
            low_stock_threshold: threshold,
        }
    }

    #[test]
    fn test_alert_classification() {
        assert_eq!(level(20, 5).alert(), None);
        assert_eq!(level(5, 5).alert(), Some(AlertType::LowStock));
        assert_eq!(level(1, 5).alert(), Some(AlertType::LowStock));
        assert_eq!(level(0, 5).alert(), Some(AlertType::OutOfStock));
        assert_eq!(level(-2, 5).alert(), Some(AlertType::OutOfStock));
    }

    #[test]
    fn test_record_sale() {
        let mut stock = level(10, 2);
        stock.record_sale(3);

        assert_eq!(stock.inventory, 7);
        assert_eq!(stock.sold_count, 3);
        assert!(stock.alert().is_none());
    }
}

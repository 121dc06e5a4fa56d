use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one order. Derived on every evaluation, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderCategory {
    Completed,
    Cancelled,
    Bomb,
    Refunded,
    Other,
}

impl OrderCategory {
    pub const ALL: [OrderCategory; 5] = [
        OrderCategory::Completed,
        OrderCategory::Cancelled,
        OrderCategory::Bomb,
        OrderCategory::Refunded,
        OrderCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderCategory::Completed => "completed",
            OrderCategory::Cancelled => "cancelled",
            OrderCategory::Bomb => "bomb",
            OrderCategory::Refunded => "refunded",
            OrderCategory::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        OrderCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == raw.trim().to_lowercase())
    }

    /// Orders that did not end in a kept sale: their cost of goods is not
    /// booked and their items count as refunded/cancelled products.
    pub fn is_lost_sale(&self) -> bool {
        matches!(
            self,
            OrderCategory::Cancelled | OrderCategory::Bomb | OrderCategory::Refunded
        )
    }

    /// Categories tracked as sub-metrics of the location distribution.
    pub fn has_location_breakdown(&self) -> bool {
        !matches!(self, OrderCategory::Other)
    }
}

impl fmt::Display for OrderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for category in OrderCategory::ALL {
            assert_eq!(OrderCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(OrderCategory::parse(" Bomb "), Some(OrderCategory::Bomb));
        assert_eq!(OrderCategory::parse("shipping"), None);
    }

    #[test]
    fn test_lost_sale_categories() {
        assert!(!OrderCategory::Completed.is_lost_sale());
        assert!(!OrderCategory::Other.is_lost_sale());
        assert!(OrderCategory::Bomb.is_lost_sale());
    }
}

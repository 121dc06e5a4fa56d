use crate::config::ClassifierKeywords;
use crate::domain::entities::order_category::OrderCategory;
use crate::domain::value_objects::normalized_text::{KeywordSet, NormalizedText};

/// Rule-based order outcome classifier.
///
/// This is the only place an order's category is decided. Rules are evaluated
/// in priority order and the first match wins:
///
/// 1. a linked refund makes the order `refunded`, whatever its status says;
/// 2. a cancel status with a bomb reason is `bomb`;
/// 3. a dedicated bomb status is `bomb`, regardless of reason;
/// 4. a cancel status is `cancelled`;
/// 5. a success status is `completed`;
/// 6. anything else is `other`.
#[derive(Debug, Clone)]
pub struct OrderClassifier {
    cancel: KeywordSet,
    bomb_reason: KeywordSet,
    bomb_status: KeywordSet,
    success: KeywordSet,
}

impl OrderClassifier {
    pub fn new(keywords: &ClassifierKeywords) -> Self {
        OrderClassifier {
            cancel: KeywordSet::new(&keywords.cancel),
            bomb_reason: KeywordSet::new(&keywords.bomb_reason),
            bomb_status: KeywordSet::new(&keywords.bomb_status),
            success: KeywordSet::new(&keywords.success),
        }
    }

    pub fn classify(&self, status: &str, cancel_reason: &str, has_refund: bool) -> OrderCategory {
        if has_refund {
            return OrderCategory::Refunded;
        }

        let status = NormalizedText::new(status);
        let reason = NormalizedText::new(cancel_reason);
        let is_cancel = self.cancel.matches(&status);

        if is_cancel && self.bomb_reason.matches(&reason) {
            OrderCategory::Bomb
        } else if self.bomb_status.matches(&status) {
            OrderCategory::Bomb
        } else if is_cancel {
            OrderCategory::Cancelled
        } else if self.success.matches(&status) {
            OrderCategory::Completed
        } else {
            OrderCategory::Other
        }
    }
}

impl Default for OrderClassifier {
    fn default() -> Self {
        Self::new(&ClassifierKeywords::default())
    }
}

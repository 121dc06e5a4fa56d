use crate::config::TagTable;
use crate::domain::value_objects::normalized_text::{KeywordSet, NormalizedText};

/// Maps free text (cancel reasons, payment methods) to a named group.
///
/// Groups are tried in table order; the first group with a keyword contained
/// in the normalized text wins. Unmatched or empty text maps to the fallback.
#[derive(Debug, Clone)]
pub struct KeywordTagger {
    groups: Vec<(String, KeywordSet)>,
    fallback: String,
}

impl KeywordTagger {
    pub fn new(table: &TagTable) -> Self {
        KeywordTagger {
            groups: table
                .groups
                .iter()
                .map(|(name, keywords)| (name.clone(), KeywordSet::new(keywords)))
                .collect(),
            fallback: table.fallback.clone(),
        }
    }

    pub fn tag(&self, text: &str) -> &str {
        let text = NormalizedText::new(text);
        self.groups
            .iter()
            .find(|(_, keywords)| keywords.matches(&text))
            .map(|(name, _)| name.as_str())
            .unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reasons() {
        let tagger = KeywordTagger::new(&TagTable::cancel_reasons());
        assert_eq!(tagger.tag("Đổi ý"), "changed_mind");
        assert_eq!(tagger.tag("Cần thay đổi địa chỉ giao hàng"), "wrong_information");
        assert_eq!(tagger.tag("Sản phẩm hết hàng"), "out_of_stock");
        assert_eq!(tagger.tag("lý do bí ẩn"), "other_reason");
        assert_eq!(tagger.tag(""), "other_reason");
    }

    #[test]
    fn test_payment_methods() {
        let tagger = KeywordTagger::new(&TagTable::payment_methods());
        assert_eq!(tagger.tag("Thanh toán khi nhận hàng"), "cod");
        assert_eq!(tagger.tag("ShopeePay"), "e_wallet");
        assert_eq!(tagger.tag("SPayLater"), "installment");
        assert_eq!(tagger.tag("Visa/Mastercard"), "card");
        assert_eq!(tagger.tag("Chuyển khoản ngân hàng"), "bank_transfer");
        assert_eq!(tagger.tag("Bitcoin"), "other_method");
    }

    #[test]
    fn test_first_matching_group_wins() {
        let table = TagTable {
            groups: vec![
                ("first".to_string(), vec!["shared".to_string()]),
                ("second".to_string(), vec!["shared".to_string(), "only".to_string()]),
            ],
            fallback: "none".to_string(),
        };
        let tagger = KeywordTagger::new(&table);
        assert_eq!(tagger.tag("a shared word"), "first");
        assert_eq!(tagger.tag("only here"), "second");
        assert_eq!(tagger.fallback(), "none");
    }
}

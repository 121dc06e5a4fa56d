use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, diacritic-stripped text used for keyword matching.
///
/// Marketplace exports mix Vietnamese with and without tone marks ("Đã hủy",
/// "Da huy", "ĐÃ HỦY"), so every comparison goes through this form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn new(raw: &str) -> Self {
        let stripped: String = raw
            .nfd()
            .filter(|c| !is_combining_mark(*c))
            .flat_map(char::to_lowercase)
            .map(|c| match c {
                'đ' => 'd',
                other => other,
            })
            .collect();

        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        NormalizedText(collapsed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A list of normalized keywords matched by substring.
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| NormalizedText::new(k.as_ref()).0)
            .filter(|k| !k.is_empty())
            .collect();
        KeywordSet { keywords }
    }

    /// True when any keyword is contained in `text`. Empty text never matches.
    pub fn matches(&self, text: &NormalizedText) -> bool {
        if text.is_empty() {
            return false;
        }
        self.keywords.iter().any(|k| text.as_str().contains(k.as_str()))
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_vietnamese_diacritics() {
        assert_eq!(NormalizedText::new("Đã hủy").as_str(), "da huy");
        assert_eq!(NormalizedText::new("ĐÃ HỦY").as_str(), "da huy");
        assert_eq!(
            NormalizedText::new("Khách không nhận hàng").as_str(),
            "khach khong nhan hang"
        );
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(NormalizedText::new("  Hoàn   thành \n").as_str(), "hoan thanh");
    }

    #[test]
    fn test_keyword_set_is_substring_match() {
        let set = KeywordSet::new(["hủy", "cancel"]);
        assert!(set.matches(&NormalizedText::new("Đơn đã hủy bởi người mua")));
        assert!(set.matches(&NormalizedText::new("CANCELLED")));
        assert!(!set.matches(&NormalizedText::new("Hoàn thành")));
    }

    #[test]
    fn test_empty_text_and_blank_keywords_never_match() {
        let set = KeywordSet::new(["", "   "]);
        assert!(set.is_empty());
        assert!(!KeywordSet::new(["huy"]).matches(&NormalizedText::new("")));
    }
}

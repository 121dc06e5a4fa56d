use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::value_objects::normalized_text::NormalizedText;

/// Keyword groups driving the order classifier.
#[derive(Debug, Clone)]
pub struct ClassifierKeywords {
    pub cancel: Vec<String>,
    pub bomb_reason: Vec<String>,
    pub bomb_status: Vec<String>,
    pub success: Vec<String>,
}

impl Default for ClassifierKeywords {
    fn default() -> Self {
        ClassifierKeywords {
            cancel: words(&["hủy", "huỷ", "cancel"]),
            bomb_reason: words(&[
                "không nhận hàng",
                "từ chối nhận",
                "không liên lạc được",
                "giao hàng thất bại",
                "refused",
                "failed delivery",
                "unreachable",
            ]),
            bomb_status: words(&[
                "giao hàng thất bại",
                "giao không thành công",
                "failed delivery",
                "delivery failed",
                "returned to sender",
            ]),
            success: words(&[
                "hoàn thành",
                "đã giao",
                "thành công",
                "completed",
                "delivered",
            ]),
        }
    }
}

/// Ordered `(group, keywords)` table with a fallback group.
#[derive(Debug, Clone)]
pub struct TagTable {
    pub groups: Vec<(String, Vec<String>)>,
    pub fallback: String,
}

impl TagTable {
    pub fn cancel_reasons() -> Self {
        TagTable {
            groups: vec![
                group("changed_mind", &["đổi ý", "không muốn mua", "changed mind", "change of mind"]),
                group("wrong_information", &["địa chỉ", "sai thông tin", "số điện thoại", "address"]),
                group("delivery_failed", &["không nhận hàng", "giao hàng thất bại", "refused", "failed delivery"]),
                group("out_of_stock", &["hết hàng", "out of stock"]),
                group("slow_delivery", &["giao lâu", "giao chậm", "thời gian giao", "late delivery"]),
                group("better_price", &["giá tốt hơn", "rẻ hơn", "better price"]),
                group("modify_order", &["thay đổi đơn", "đổi sản phẩm", "voucher", "modify"]),
            ],
            fallback: "other_reason".to_string(),
        }
    }

    pub fn payment_methods() -> Self {
        TagTable {
            groups: vec![
                group("cod", &["cod", "thanh toán khi nhận hàng", "cash on delivery"]),
                group("installment", &["trả góp", "spaylater", "paylater", "installment"]),
                group("e_wallet", &["ví điện tử", "shopeepay", "airpay", "momo", "zalopay", "wallet"]),
                group("card", &["thẻ tín dụng", "thẻ ghi nợ", "credit", "debit", "visa", "mastercard"]),
                group("bank_transfer", &["chuyển khoản", "ngân hàng", "bank", "transfer"]),
            ],
            fallback: "other_method".to_string(),
        }
    }
}

/// Reference coordinates keyed by normalized province name.
#[derive(Debug, Clone, Default)]
pub struct ProvinceCoordinates {
    entries: BTreeMap<String, (f64, f64)>,
}

impl ProvinceCoordinates {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64, f64)>,
        S: AsRef<str>,
    {
        ProvinceCoordinates {
            entries: entries
                .into_iter()
                .map(|(name, lat, lng)| (Self::key(name.as_ref()), (lat, lng)))
                .collect(),
        }
    }

    pub fn vietnam() -> Self {
        Self::new([
            ("Hà Nội", 21.0285, 105.8542),
            ("Hồ Chí Minh", 10.8231, 106.6297),
            ("TP. Hồ Chí Minh", 10.8231, 106.6297),
            ("Đà Nẵng", 16.0544, 108.2022),
            ("Hải Phòng", 20.8449, 106.6881),
            ("Cần Thơ", 10.0452, 105.7469),
            ("Bình Dương", 11.3254, 106.4770),
            ("Đồng Nai", 10.9453, 106.8243),
            ("Khánh Hòa", 12.2585, 109.0526),
            ("Quảng Ninh", 21.0064, 107.2925),
            ("Thừa Thiên Huế", 16.4637, 107.5909),
            ("Nghệ An", 18.6796, 105.6813),
            ("Bà Rịa - Vũng Tàu", 10.5417, 107.2429),
            ("Lâm Đồng", 11.5753, 108.1429),
        ])
    }

    pub fn lookup(&self, province: &str) -> Option<(f64, f64)> {
        self.entries.get(&Self::key(province)).copied()
    }

    fn key(province: &str) -> String {
        NormalizedText::new(province).as_str().to_string()
    }
}

/// Configuration of the classification, rollup and query engine
#[derive(Debug, Clone)]
pub struct KpiConfig {
    pub classifier: ClassifierKeywords,
    pub cancel_reason_tags: TagTable,
    pub payment_method_tags: TagTable,
    pub province_coordinates: ProvinceCoordinates,

    pub refund_epsilon: f64, // a transaction refunds when refund_amount < -refund_epsilon
    pub top_n: usize,        // length of top product lists
    pub churn_window_days: i64,
    pub max_range_days: i64,

    // Range cache
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,

    // Recompute worker
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub refresh_interval_seconds: u64,
}

impl Default for KpiConfig {
    fn default() -> Self {
        KpiConfig {
            classifier: ClassifierKeywords::default(),
            cancel_reason_tags: TagTable::cancel_reasons(),
            payment_method_tags: TagTable::payment_methods(),
            province_coordinates: ProvinceCoordinates::vietnam(),

            refund_epsilon: 0.1,
            top_n: 10,
            churn_window_days: 90,
            max_range_days: 366,

            cache_ttl_seconds: 300, // 5 minutes
            cache_capacity: 1024,

            worker_concurrency: 4,
            max_retries: 3,
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 5_000,
            refresh_interval_seconds: 900, // 15 minutes
        }
    }
}

impl KpiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> KpiConfig {
        let mut config = KpiConfig::default();

        if let Some(list) = env_list("KPI_CANCEL_KEYWORDS") {
            config.classifier.cancel = list;
        }
        if let Some(list) = env_list("KPI_BOMB_REASON_KEYWORDS") {
            config.classifier.bomb_reason = list;
        }
        if let Some(list) = env_list("KPI_BOMB_STATUS_KEYWORDS") {
            config.classifier.bomb_status = list;
        }
        if let Some(list) = env_list("KPI_SUCCESS_KEYWORDS") {
            config.classifier.success = list;
        }

        if let Ok(raw) = std::env::var("KPI_REFUND_EPSILON") {
            match raw.parse::<f64>() {
                Ok(value) if value >= 0.0 && value.is_finite() => config.refund_epsilon = value,
                Ok(value) => {
                    tracing::warn!(
                        "Invalid KPI_REFUND_EPSILON value: {} (must be non-negative), using default: {}",
                        value,
                        config.refund_epsilon
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse KPI_REFUND_EPSILON '{}': {}, using default: {}",
                        raw,
                        e,
                        config.refund_epsilon
                    );
                }
            }
        }

        if let Some(value) = env_positive::<usize>("KPI_TOP_N") {
            config.top_n = value;
        }
        if let Some(value) = env_positive::<i64>("KPI_CHURN_WINDOW_DAYS") {
            config.churn_window_days = value;
        }
        if let Some(value) = env_positive::<i64>("KPI_MAX_RANGE_DAYS") {
            config.max_range_days = value;
        }
        if let Some(value) = env_positive::<u64>("KPI_CACHE_TTL_SECONDS") {
            config.cache_ttl_seconds = value;
        }
        if let Some(value) = env_positive::<usize>("KPI_CACHE_CAPACITY") {
            config.cache_capacity = value;
        }
        if let Some(value) = env_positive::<usize>("KPI_WORKER_CONCURRENCY") {
            config.worker_concurrency = value;
        }
        if let Some(value) = env_positive::<u32>("KPI_MAX_RETRIES") {
            config.max_retries = value;
        }
        if let Some(value) = env_positive::<u64>("KPI_INITIAL_RETRY_DELAY_MS") {
            config.initial_retry_delay_ms = value;
        }
        if let Some(value) = env_positive::<u64>("KPI_MAX_RETRY_DELAY_MS") {
            config.max_retry_delay_ms = value;
        }
        if let Some(value) = env_positive::<u64>("KPI_REFRESH_INTERVAL_SECONDS") {
            config.refresh_interval_seconds = value;
        }

        if config.max_retry_delay_ms < config.initial_retry_delay_ms {
            tracing::warn!(
                "KPI_MAX_RETRY_DELAY_MS ({}) is below the initial delay ({}), raising it",
                config.max_retry_delay_ms,
                config.initial_retry_delay_ms
            );
            config.max_retry_delay_ms = config.initial_retry_delay_ms;
        }

        config
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

fn group(name: &str, keywords: &[&str]) -> (String, Vec<String>) {
    (name.to_string(), words(keywords))
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let list: Vec<String> = raw
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if list.is_empty() {
        tracing::warn!("{} is set but empty, keeping default keywords", name);
        return None;
    }
    Some(list)
}

fn env_positive<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default + std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        Ok(value) => {
            tracing::warn!("Invalid {} value: {} (must be positive), using default", name, value);
            None
        }
        Err(_) => {
            tracing::warn!("Failed to parse {} '{}', using default", name, raw);
            None
        }
    }
}

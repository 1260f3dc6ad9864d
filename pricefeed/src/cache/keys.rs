//! Cache key layout and TTL policy.

use crate::cache::backend::escape_glob;
use std::borrow::Cow;
use std::time::Duration;

/// Builds namespaced cache keys:
/// `<ns>:price:<symbol>:<currency>`, `<ns>:chart:<symbol>:<days>`, `<ns>:info:<id>`.
///
/// `:` and `%` inside symbols, currencies and ids are percent-encoded so a
/// caller-supplied value always occupies exactly one key segment.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    namespace: String,
}

impl CacheKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn price(&self, symbol: &str, currency: &str) -> String {
        format!("{}:price:{}:{}", self.namespace, segment(symbol), segment(currency))
    }

    pub fn chart(&self, symbol: &str, days: u32) -> String {
        format!("{}:chart:{}:{}", self.namespace, segment(symbol), days)
    }

    pub fn info(&self, id: &str) -> String {
        format!("{}:info:{}", self.namespace, segment(id))
    }

    /// Patterns covering every entry for `symbol`, one per operation type.
    pub fn symbol_patterns(&self, symbol: &str) -> Vec<String> {
        let ns = escape_glob(&self.namespace);
        let symbol = escape_glob(&segment(symbol));
        vec![
            format!("{}:price:{}:*", ns, symbol),
            format!("{}:chart:{}:*", ns, symbol),
            format!("{}:info:{}", ns, symbol),
        ]
    }

    /// Pattern covering every key owned by this namespace.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.namespace))
    }
}

fn segment(value: &str) -> Cow<'_, str> {
    if value.contains([':', '%']) {
        Cow::Owned(value.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(value)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("pricefeed")
    }
}

/// TTL per data class.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    /// Spot prices
    pub price: Duration,
    /// Charts shorter than `long_chart_days`
    pub chart: Duration,
    /// Charts of `long_chart_days` or more
    pub long_chart: Duration,
    pub long_chart_days: u32,
    /// Coin metadata
    pub info: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            price: Duration::from_secs(30),
            chart: Duration::from_secs(5 * 60),
            long_chart: Duration::from_secs(15 * 60),
            long_chart_days: 7,
            info: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheTtls {
    /// Longer ranges change less between fetches, so they live longer.
    pub fn for_chart(&self, days: u32) -> Duration {
        if days >= self.long_chart_days {
            self.long_chart
        } else {
            self.chart
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::glob_match;

    #[test]
    fn test_key_layout() {
        let keys = CacheKeys::new("pf");
        assert_eq!(keys.price("bitcoin", "usd"), "pf:price:bitcoin:usd");
        assert_eq!(keys.chart("bitcoin", 30), "pf:chart:bitcoin:30");
        assert_eq!(keys.info("bitcoin"), "pf:info:bitcoin");
        assert_eq!(keys.namespace_pattern(), "pf:*");
    }

    #[test]
    fn test_symbol_patterns_cover_all_operations() {
        let patterns = CacheKeys::new("pf").symbol_patterns("bitcoin");
        assert_eq!(
            patterns,
            vec!["pf:price:bitcoin:*", "pf:chart:bitcoin:*", "pf:info:bitcoin"]
        );
    }

    #[test]
    fn test_colon_in_symbol_stays_in_one_segment() {
        let keys = CacheKeys::new("pf");
        let forked = keys.price("bitcoin:cash", "usd");
        assert_eq!(forked, "pf:price:bitcoin%3Acash:usd");
        assert_eq!(keys.info("a%b"), "pf:info:a%25b");

        let bitcoin = keys.symbol_patterns("bitcoin");
        assert!(!bitcoin.iter().any(|p| glob_match(p, &forked)));
        assert!(glob_match(&bitcoin[0], &keys.price("bitcoin", "usd")));

        let patterns = keys.symbol_patterns("bitcoin:cash");
        assert!(glob_match(&patterns[0], &forked));
        assert!(glob_match(&patterns[1], &keys.chart("bitcoin:cash", 7)));
        assert!(!glob_match(&patterns[0], &keys.price("bitcoin", "usd")));
    }

    #[test]
    fn test_chart_ttl_grows_with_range() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.for_chart(1), ttls.chart);
        assert_eq!(ttls.for_chart(6), ttls.chart);
        assert_eq!(ttls.for_chart(7), ttls.long_chart);
        assert_eq!(ttls.for_chart(90), ttls.long_chart);
        assert!(ttls.long_chart > ttls.chart);
        assert!(ttls.price < ttls.chart);
        assert!(ttls.info > ttls.price);
    }
}

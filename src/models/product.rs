//! Product and run-summary types.
//!
//! A `ProductRecord` is the unit of work flowing from the catalog reader
//! through the generator into the checkpoint store.

use serde::{Deserialize, Serialize};

/// A product row eligible for rewriting.
///
/// Invariant: `key`, `display_name` and `description` are non-empty after
/// trimming. Only the catalog reader constructs these from source rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Unique product key (the Shopify handle)
    pub key: String,
    /// Product title
    pub display_name: String,
    /// Current rich-text (HTML) description
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub compare_at_price: String,
    #[serde(default)]
    pub inventory_qty: String,
    #[serde(default)]
    pub image_src: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub tags: String,
    /// Optional labelled columns, in configured order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metafields: Vec<(String, String)>,
}

impl ProductRecord {
    /// Build a record with only the required fields set.
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            description: description.into(),
            vendor: String::new(),
            category: String::new(),
            price: String::new(),
            compare_at_price: String::new(),
            inventory_qty: String::new(),
            image_src: String::new(),
            sku: String::new(),
            tags: String::new(),
            metafields: Vec::new(),
        }
    }

    /// Whether title, category or tags mention any of `keywords` (case-insensitive).
    pub fn matches_keywords(&self, keywords: &[String]) -> bool {
        let haystack =
            format!("{} {} {}", self.display_name, self.category, self.tags).to_lowercase();
        keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .any(|k| haystack.contains(&k.to_lowercase()))
    }

    /// Non-empty metafields only.
    pub fn present_metafields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metafields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(label, value)| (label.as_str(), value.as_str()))
    }
}

/// Statistics for a complete run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Candidates selected for this run
    pub total_candidates: usize,

    /// Generation calls started
    pub total_attempted: usize,

    /// Products whose content was recorded
    pub total_completed: usize,

    /// Products whose generation failed
    pub total_failed: usize,

    /// Candidates skipped because content already existed
    pub total_skipped: usize,

    /// Checkpoint flushes that failed (state kept in memory)
    pub persist_failures: usize,

    /// Completed products in the checkpoint after the run
    pub checkpoint_completed: usize,

    /// Whether the run stopped on an operator interrupt
    pub interrupted: bool,

    /// Total LLM cost (USD)
    pub cost_usd: f64,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Completed products per hour
    pub throughput_per_hour: f64,

    /// Success rate over attempted products (0.0 - 1.0)
    pub success_rate: f64,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_attempted > 0 {
            self.success_rate = self.total_completed as f64 / self.total_attempted as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.total_completed as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let mut product = ProductRecord::new("oud-mist", "Oud Mist", "<p>Smoky.</p>");
        product.tags = "Unisex, EAU DE PARFUM".to_string();
        let keywords = vec!["eau de".to_string()];
        assert!(product.matches_keywords(&keywords));

        let other = ProductRecord::new("grinder", "Herb Grinder", "<p>Steel.</p>");
        assert!(!other.matches_keywords(&keywords));
    }

    #[test]
    fn test_blank_keywords_never_match() {
        let product = ProductRecord::new("a", "Anything", "<p>x</p>");
        assert!(!product.matches_keywords(&[" ".to_string()]));
    }

    #[test]
    fn test_finalize_derives_rates() {
        let mut stats = RunStats {
            total_attempted: 4,
            total_completed: 3,
            runtime_secs: 1800.0,
            ..Default::default()
        };
        stats.finalize();
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(stats.throughput_per_hour, 6.0);
    }
}

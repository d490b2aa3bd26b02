//! Configuration models for catalog-scribe.
//!
//! Every tunable is parameterized here and resolved at runtime from a TOML
//! file. A missing file means built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

/// Top-level configuration for catalog-scribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completions endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Model used for the product research call
    #[serde(default = "default_research_model")]
    pub research: ModelSpec,

    /// Model used for writing the final description
    #[serde(default = "default_writer_model")]
    pub writer: ModelSpec,

    /// Source table column mapping
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Batch driver settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Community quote search
    #[serde(default)]
    pub community: CommunityConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            research: default_research_model(),
            writer: default_writer_model(),
            catalog: CatalogConfig::default(),
            batch: BatchConfig::default(),
            community: CommunityConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// OpenAI-compatible endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Specification for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model ID as understood by the endpoint
    pub id: String,

    /// Maximum tokens for the completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Input price per 1M tokens (USD)
    #[serde(default)]
    pub input_price_per_1m: f64,

    /// Output price per 1M tokens (USD)
    #[serde(default)]
    pub output_price_per_1m: f64,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_research_model() -> ModelSpec {
    ModelSpec {
        id: "gpt-4o-2024-11-20".to_string(),
        max_tokens: 1500,
        temperature: 0.7,
        input_price_per_1m: 2.5,
        output_price_per_1m: 10.0,
    }
}

fn default_writer_model() -> ModelSpec {
    ModelSpec {
        id: "gpt-4o-2024-11-20".to_string(),
        max_tokens: 2000,
        temperature: 0.8,
        input_price_per_1m: 2.5,
        output_price_per_1m: 10.0,
    }
}

/// Column names in the source table.
///
/// Defaults match the header of a Shopify product export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub key_column: String,
    pub name_column: String,
    pub description_column: String,
    pub vendor_column: String,
    pub category_column: String,
    pub price_column: String,
    pub compare_at_price_column: String,
    pub inventory_column: String,
    pub image_column: String,
    pub sku_column: String,
    pub tags_column: String,
    /// Optional domain-specific columns, kept in this order
    pub metafields: Vec<MetafieldColumn>,
}

/// A labelled optional column (e.g. a Shopify metafield).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldColumn {
    /// Short label used in prompts
    pub label: String,
    /// Header name in the source table
    pub column: String,
}

impl MetafieldColumn {
    fn new(label: &str, column: &str) -> Self {
        Self {
            label: label.to_string(),
            column: column.to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            key_column: "Handle".to_string(),
            name_column: "Title".to_string(),
            description_column: "Body (HTML)".to_string(),
            vendor_column: "Vendor".to_string(),
            category_column: "Product Category".to_string(),
            price_column: "Variant Price".to_string(),
            compare_at_price_column: "Variant Compare At Price".to_string(),
            inventory_column: "Variant Inventory Qty".to_string(),
            image_column: "Image Src".to_string(),
            sku_column: "Variant SKU".to_string(),
            tags_column: "Tags".to_string(),
            metafields: vec![
                MetafieldColumn::new(
                    "top_notes",
                    "Top Notes (product.metafields.custom.top_notes)",
                ),
                MetafieldColumn::new(
                    "middle_notes",
                    "Middle Notes (product.metafields.custom.middle_notes)",
                ),
                MetafieldColumn::new(
                    "base_notes",
                    "Base Notes (product.metafields.custom.base_notes)",
                ),
                MetafieldColumn::new("longevity", "Longevity"),
                MetafieldColumn::new("sillage", "Sillage"),
                MetafieldColumn::new("season", "Season (product.metafields.shopify.season)"),
                MetafieldColumn::new(
                    "occasion",
                    "Occasion (product.metafields.shopify.occasion)",
                ),
            ],
        }
    }
}

/// Batch driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Fixed delay between generation calls, in seconds
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,

    /// Default product limit per run (unbounded if unset)
    #[serde(default)]
    pub limit: Option<usize>,

    /// Use a templated description when the writer call fails
    #[serde(default)]
    pub fallback_on_error: bool,
}

fn default_delay_secs() -> f64 {
    2.0
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
            limit: None,
            fallback_on_error: false,
        }
    }
}

/// Community quote search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    pub enabled: bool,
    pub base_url: String,
    pub subreddit: String,
    /// Products matching any keyword (title, category, tags) get community quotes
    pub keywords: Vec<String>,
    pub min_upvotes: i64,
    pub max_quotes: usize,
    pub request_delay_secs: f64,
    pub timeout_secs: u64,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.reddit.com".to_string(),
            subreddit: "fragrance".to_string(),
            keywords: ["perfume", "fragrance", "cologne", "eau de", "parfum", "oil", "scent"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_upvotes: 5,
            max_quotes: 5,
            request_delay_secs: 1.0,
            timeout_secs: 10,
        }
    }
}

/// Quoting applied to rewritten rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStyle {
    /// Quote every field, as Shopify exports do
    #[default]
    Always,
    /// Quote only fields that need it
    Necessary,
}

impl From<QuoteStyle> for csv::QuoteStyle {
    fn from(style: QuoteStyle) -> Self {
        match style {
            QuoteStyle::Always => csv::QuoteStyle::Always,
            QuoteStyle::Necessary => csv::QuoteStyle::Necessary,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub quote_style: QuoteStyle,
    /// Storefront base URL used in structured-data offers
    pub store_url: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            quote_style: QuoteStyle::Always,
            store_url: "https://example.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.llm.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey {
                env_var: self.llm.api_key_env.clone(),
            })
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_delay("batch.delay_secs", self.batch.delay_secs)?;
        check_delay(
            "community.request_delay_secs",
            self.community.request_delay_secs,
        )?;
        if self.batch.limit == Some(0) {
            return Err(ConfigError::Invalid(
                "batch.limit must be at least 1 when set".to_string(),
            ));
        }
        if self.llm.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_retries must be at least 1".to_string(),
            ));
        }
        let required = [
            &self.catalog.key_column,
            &self.catalog.name_column,
            &self.catalog.description_column,
        ];
        if required.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "catalog key, name and description columns must be named".to_string(),
            ));
        }
        Ok(())
    }
}

/// Longest configurable pause between requests.
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Reject delays that are negative, not finite or longer than an hour.
pub fn check_delay(name: &str, secs: f64) -> Result<(), ConfigError> {
    if !(0.0..=MAX_DELAY_SECS).contains(&secs) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 0 and {MAX_DELAY_SECS} seconds, got {secs}"
        )));
    }
    Ok(())
}

/// Convert a configured delay, clamping out-of-range values into
/// `0..=MAX_DELAY_SECS`.
pub fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.min(MAX_DELAY_SECS)).unwrap_or_default()
}

static ENV_VAR_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
});

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or llm.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

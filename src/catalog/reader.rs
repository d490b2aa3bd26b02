//! Catalog reader: streams product rows from a Shopify export.
//!
//! - A row is a product only if key, title and description are non-empty
//! - The first qualifying row per key wins; later rows are variants
//! - Reading stops as soon as the requested number of candidates is found

use crate::models::{CatalogConfig, ProductRecord, Result, ScribeError};
use csv::StringRecord;
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolved header positions for the configured columns.
#[derive(Debug, Clone)]
struct ColumnIndex {
    key: usize,
    name: usize,
    description: usize,
    vendor: Option<usize>,
    category: Option<usize>,
    price: Option<usize>,
    compare_at_price: Option<usize>,
    inventory: Option<usize>,
    image: Option<usize>,
    sku: Option<usize>,
    tags: Option<usize>,
    metafields: Vec<(String, Option<usize>)>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, config: &CatalogConfig, path: &Path) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| ScribeError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
        };

        Ok(Self {
            key: require(&config.key_column)?,
            name: require(&config.name_column)?,
            description: require(&config.description_column)?,
            vendor: find(&config.vendor_column),
            category: find(&config.category_column),
            price: find(&config.price_column),
            compare_at_price: find(&config.compare_at_price_column),
            inventory: find(&config.inventory_column),
            image: find(&config.image_column),
            sku: find(&config.sku_column),
            tags: find(&config.tags_column),
            metafields: config
                .metafields
                .iter()
                .map(|m| (m.label.clone(), find(&m.column)))
                .collect(),
        })
    }

    /// Build a product from `row` if it qualifies.
    fn product(&self, row: &StringRecord) -> Option<ProductRecord> {
        let required = |idx: usize| row.get(idx).map(str::trim).filter(|v| !v.is_empty());
        let optional = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .unwrap_or_default()
                .to_string()
        };

        let key = required(self.key)?;
        let display_name = required(self.name)?;
        let description = required(self.description)?;

        Some(ProductRecord {
            key: key.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            vendor: optional(self.vendor),
            category: optional(self.category),
            price: optional(self.price),
            compare_at_price: optional(self.compare_at_price),
            inventory_qty: optional(self.inventory),
            image_src: optional(self.image),
            sku: optional(self.sku),
            tags: optional(self.tags),
            metafields: self
                .metafields
                .iter()
                .map(|(label, idx)| (label.clone(), optional(*idx)))
                .collect(),
        })
    }
}

/// Counts over the whole catalog, for status reporting.
#[derive(Debug, Clone, Default)]
pub struct CatalogSurvey {
    /// Data rows in the table (excluding the header)
    pub total_rows: usize,
    /// Unique product keys in first-seen order
    pub product_keys: Vec<String>,
}

impl CatalogSurvey {
    /// Products in the catalog not yet in `processed`.
    pub fn remaining<'a>(&'a self, processed: &'a BTreeSet<String>) -> impl Iterator<Item = &'a str> {
        self.product_keys
            .iter()
            .filter(|key| !processed.contains(*key))
            .map(String::as_str)
    }
}

/// Reader over a product-export table.
pub struct CatalogReader {
    path: PathBuf,
    config: CatalogConfig,
}

impl CatalogReader {
    pub fn new(path: &Path, config: CatalogConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<(csv::Reader<File>, ColumnIndex)> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| ScribeError::source_read(&self.path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| ScribeError::source_read(&self.path, e))?
            .clone();
        let columns = ColumnIndex::resolve(&headers, &self.config, &self.path)?;
        Ok((reader, columns))
    }

    /// Select up to `limit` unprocessed products in file order.
    ///
    /// Keys in `processed` are skipped entirely. With a finite limit the
    /// table is only read as far as needed.
    pub fn candidates(
        &self,
        processed: &BTreeSet<String>,
        limit: Option<usize>,
    ) -> Result<Vec<ProductRecord>> {
        let (mut reader, columns) = self.open()?;
        let limit = limit.unwrap_or(usize::MAX);
        let mut seen: HashSet<String> = HashSet::new();
        let mut selected = Vec::new();
        let mut row = StringRecord::new();

        while selected.len() < limit
            && reader
                .read_record(&mut row)
                .map_err(|e| ScribeError::source_read(&self.path, e))?
        {
            let Some(product) = columns.product(&row) else {
                continue;
            };
            if !seen.insert(product.key.clone()) || processed.contains(&product.key) {
                continue;
            }
            debug!(key = %product.key, title = %product.display_name, "Selected candidate");
            selected.push(product);
        }

        info!(
            candidates = selected.len(),
            already_processed = processed.len(),
            "Selected products for this run"
        );
        Ok(selected)
    }

    /// Walk the whole table and collect unique product keys.
    pub fn survey(&self) -> Result<CatalogSurvey> {
        let (mut reader, columns) = self.open()?;
        let mut survey = CatalogSurvey::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut row = StringRecord::new();

        while reader
            .read_record(&mut row)
            .map_err(|e| ScribeError::source_read(&self.path, e))?
        {
            survey.total_rows += 1;
            if let Some(product) = columns.product(&row) {
                if seen.insert(product.key.clone()) {
                    survey.product_keys.push(product.key);
                }
            }
        }

        Ok(survey)
    }
}

//! Description generation.
//!
//! - `Generator` is the seam the batch driver calls once per product
//! - `ProductDescriber` is the LLM-backed implementation
//! - Prompts, community quotes and output cleanup live in submodules

mod cleanup;
mod community;
mod describer;
mod prompts;

pub use cleanup::{clean_html, extract_json_object, plain_text};
pub use community::{CommunityQuote, CommunitySearch};
pub use describer::ProductDescriber;
pub use prompts::{ProductKind, fallback_description, structured_data};

use crate::models::{GenerationError, ProductRecord};
use std::future::Future;

/// Produces replacement content for one product.
pub trait Generator: Send + Sync {
    /// Generate the new description for `product`.
    fn generate(
        &self,
        product: &ProductRecord,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;

    /// Spend so far, in USD.
    fn cost_usd(&self) -> f64 {
        0.0
    }
}

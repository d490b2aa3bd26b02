//! Product export access.
//!
//! - `CatalogReader` selects candidate products for a batch
//! - `CatalogWriter` produces rewritten exports and extracts

mod reader;
mod writer;

pub use reader::*;
pub use writer::*;

//! Core data models for catalog-scribe.
//!
//! - Configuration parsed from TOML
//! - Error taxonomy shared by every module
//! - Product records and run statistics

mod config;
mod error;
mod product;

pub use config::*;
pub use error::*;
pub use product::*;

//! catalog-scribe - resumable LLM rewriting of product descriptions in a
//! Shopify product export.
//!
//! ## Architecture
//!
//! - **Catalog**: selects candidate products and writes derived tables,
//!   copying untouched rows byte for byte
//! - **Checkpoint**: durable `key → content` map, flushed after every product
//! - **Generate**: research, community quotes and copywriting via an
//!   OpenAI-compatible endpoint
//! - **Pipeline**: sequential batch driver with cooperative cancellation
//!
//! ## Resumability
//!
//! Every generated description is persisted before the next product starts.
//! A later run skips recorded products, so an interrupted batch loses at
//! most the in-flight item.

pub mod catalog;
pub mod checkpoint;
pub mod client;
pub mod generate;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use catalog::{CatalogReader, CatalogWriter};
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use client::{LlmClient, RateLimiter};
pub use generate::{Generator, ProductDescriber};
pub use models::{Config, GenerationError, ProductRecord, Result, RunStats, ScribeError};
pub use pipeline::{BatchDriver, BatchReport, RewritePipeline, RunOptions, StatusReport};

//! Chat-completions client module.

mod llm_client;
mod rate_limiter;

pub use llm_client::*;
pub use rate_limiter::*;

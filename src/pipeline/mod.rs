//! Pipeline module - batch driver, rewrite run and maintenance reports.

mod batch;
mod rewrite;
mod status;

pub use batch::*;
pub use rewrite::*;
pub use status::*;

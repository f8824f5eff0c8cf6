//! Loan document assembly.
//!
//! Takes a loan that reached its trigger milestone, decides which documents
//! it needs via a rule engine, renders each one through a template merge
//! engine, and emails the finished set to the borrower. The whole flow runs
//! on bounded queues and fixed worker pools; see [`pipeline::AssemblyPipeline`]
//! for the entry point.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod rules;
pub mod store;
pub mod template;

pub use error::{Error, Result};

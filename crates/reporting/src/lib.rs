//! Runs compiled reports: the `ReportExecutor` with its deadline and cancellation
//! handling, and the `ReportService` that previews and executes templates.

pub mod error;
pub mod executor;
pub mod service;

pub use error::{ExecutionError, ReportError};
pub use executor::{ExecutionContext, ExecutionOptions, QueryRunner, ReportExecutor};
pub use service::{Preview, ReportService, SampleFilter};

use compiler::CompileError;
use database::DbError;
use thiserror::Error;

/// Failures while running a compiled report. None of them are retried.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Report query failed: {0}")]
    Database(#[from] DbError),

    #[error("Report query failed: {0}")]
    Query(String),

    #[error("Report query exceeded its deadline of {timeout_ms} ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("Report query was cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl ReportError {
    /// The calculation names the error is about, if any.
    pub fn names(&self) -> Vec<String> {
        match self {
            ReportError::Compile(e) => e.names(),
            ReportError::Execution(_) => Vec::new(),
        }
    }
}

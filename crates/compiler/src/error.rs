use calculations::RegistryError;
use core_types::{AggregationLevel, GroupLevel};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(
        "Calculation '{calculation}' is {group_level}-level and cannot be used in a {aggregation_level}-level report"
    )]
    LevelMismatch {
        calculation: String,
        group_level: GroupLevel,
        aggregation_level: AggregationLevel,
    },

    #[error("Invalid report request: {reason}")]
    InvalidRequest { reason: String, names: Vec<String> },
}

impl CompileError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CompileError::InvalidRequest {
            reason: reason.into(),
            names: Vec::new(),
        }
    }

    pub(crate) fn invalid_names(reason: impl Into<String>, names: Vec<String>) -> Self {
        CompileError::InvalidRequest {
            reason: reason.into(),
            names,
        }
    }

    /// The calculation names the error is about.
    pub fn names(&self) -> Vec<String> {
        match self {
            CompileError::Registry(e) => e.names(),
            CompileError::LevelMismatch { calculation, .. } => vec![calculation.clone()],
            CompileError::InvalidRequest { names, .. } => names.clone(),
        }
    }
}

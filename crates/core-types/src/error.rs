use crate::enums::SourceModel;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Field '{field}' is not a column of {model}")]
    UnknownField { model: SourceModel, field: String },
}
